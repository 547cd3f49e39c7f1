//! Optimization coordinator
//!
//! Runs mutually exclusive optimization cycles across the cache, memory
//! manager, background processor and monitor, and derives suggestions from
//! their combined metrics.

pub mod coordinator;
pub mod suggestions;
pub mod types;

pub use coordinator::Optimizer;
pub use types::{
    AutoOptimizationResult, OptimizationOutcome, OptimizationRun, OptimizationStep,
    OptimizerState, PerformanceExport, PerformanceMetrics, StepResult, EXPORT_VERSION,
};
