//! perfcore - performance and resource-management core
//!
//! A coordinated set of components for keeping a long-running process fast
//! and within its memory budget.
//!
//! # Architecture
//!
//! - **cache**: bounded, compressing key/value store with TTL expiry and
//!   priority-aware LRU eviction
//! - **memory**: named object pools, managed objects and threshold-triggered
//!   reclamation
//! - **tasks**: priority background processor with a bounded worker pool
//! - **monitor**: CPU, memory and scheduler lag sampling plus operation timings
//! - **optimizer**: periodic optimization cycles, metrics and suggestions
//!
//! Every component owns an event bus; subscribe to observe what it does.

pub mod errors;
pub mod types;
pub mod config;
pub mod events;

pub mod cache;
pub mod memory;
pub mod tasks;
pub mod monitor;
pub mod optimizer;

pub mod cli;

// Re-export commonly used types
pub use cache::{Cache, SetOptions};
pub use config::Config;
pub use errors::{CoreError, Result};
pub use events::EventBus;
pub use memory::MemoryManager;
pub use monitor::PerformanceMonitor;
pub use optimizer::Optimizer;
pub use tasks::{BackgroundProcessor, TaskSpec};
pub use types::{Priority, Severity, Suggestion, SuggestionCategory};
