//! Background task processing
//!
//! Tasks are queued by priority and run on a bounded pool of workers with
//! per-task timeouts.

pub mod processor;
mod queue;
pub mod types;
pub mod worker;

pub use processor::{BackgroundProcessor, TaskHandle};
pub use types::{
    Job, QueueStats, TaskError, TaskEvent, TaskId, TaskInfo, TaskKind, TaskPriority, TaskResult,
    TaskSpec, TaskStatus,
};
pub use worker::{Handler, HandlerRegistry};
