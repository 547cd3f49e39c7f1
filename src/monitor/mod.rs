//! Performance monitoring
//!
//! Samples real process metrics on an interval, aggregates named operation
//! and render timings, and derives a health score plus suggestions.

pub mod history;
#[allow(clippy::module_inception)]
pub mod monitor;
pub mod sampler;
pub mod types;

pub use history::RollingHistory;
pub use monitor::{PerformanceMonitor, SUMMARY_WINDOW};
pub use sampler::SystemSampler;
pub use types::{
    Metric, MonitorEvent, PerformanceSummary, SystemSample, TimedValue, TimingRecord, TimingStats,
};
