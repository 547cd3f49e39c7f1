//! Background task data types

use crate::types::Priority;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Task priority, shared with the cache
pub type TaskPriority = Priority;

/// Unique task identifier
pub type TaskId = Uuid;

/// Closure body for tasks submitted without a registered handler
pub type Job = Box<dyn FnOnce() -> std::result::Result<serde_json::Value, String> + Send>;

/// What a task does; handlers are registered per kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Compute,
    Compression,
    Analysis,
    Indexing,
    Custom(String),
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Compute => f.write_str("compute"),
            TaskKind::Compression => f.write_str("compression"),
            TaskKind::Analysis => f.write_str("analysis"),
            TaskKind::Indexing => f.write_str("indexing"),
            TaskKind::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Why a task did not produce a value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Task timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Task {id} was cancelled")]
    Cancelled { id: TaskId },

    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("No handler registered for task kind '{0}'")]
    NoHandler(TaskKind),

    #[error("Background processor is shut down")]
    Shutdown,
}

/// Outcome delivered to the submitter
pub type TaskResult = std::result::Result<serde_json::Value, TaskError>;

/// A unit of work to submit
pub struct TaskSpec {
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    /// Execution limit, `None` uses the configured default
    pub timeout: Option<Duration>,
    pub(crate) job: Option<Job>,
}

impl TaskSpec {
    /// Task dispatched to the handler registered for `kind`
    pub fn new(kind: TaskKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            priority: TaskPriority::Normal,
            timeout: None,
            job: None,
        }
    }

    /// Task that runs `f` directly
    pub fn from_fn<F>(kind: TaskKind, f: F) -> Self
    where
        F: FnOnce() -> std::result::Result<serde_json::Value, String> + Send + 'static,
    {
        Self {
            kind,
            payload: serde_json::Value::Null,
            priority: TaskPriority::Normal,
            timeout: None,
            job: Some(Box::new(f)),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("has_job", &self.job.is_some())
            .finish()
    }
}

/// Task record held by the queue
pub(crate) struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub timeout: Duration,
    pub payload: serde_json::Value,
    pub job: Option<Job>,
    pub status: TaskStatus,
    pub submitted_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: TaskId, spec: TaskSpec, default_timeout: Duration) -> Self {
        Self {
            id,
            kind: spec.kind,
            priority: spec.priority,
            timeout: spec.timeout.unwrap_or(default_timeout),
            payload: spec.payload,
            job: spec.job,
            status: TaskStatus::Queued,
            submitted_at: Instant::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn wait_time(&self) -> Option<Duration> {
        self.started_at
            .map(|s| s.saturating_duration_since(self.submitted_at))
    }

    pub fn processing_time(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some(f.saturating_duration_since(s)),
            _ => None,
        }
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            kind: self.kind.clone(),
            priority: self.priority,
            status: self.status,
            timeout_ms: self.timeout.as_millis() as u64,
            wait_ms: self.wait_time().map(|d| d.as_millis() as u64),
            processing_ms: self.processing_time().map(|d| d.as_millis() as u64),
            error: self.error.clone(),
        }
    }
}

/// Everything a worker needs to run one task
pub(crate) struct Dispatch {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub job: Option<Job>,
    pub timeout: Duration,
}

/// Public snapshot of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub timeout_ms: u64,
    pub wait_ms: Option<u64>,
    pub processing_ms: Option<u64>,
    pub error: Option<String>,
}

/// Events emitted by the background processor
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskQueued {
        id: TaskId,
        kind: TaskKind,
        priority: TaskPriority,
        queue_len: usize,
    },
    TaskCompleted {
        id: TaskId,
        duration_ms: u64,
    },
    TaskFailed {
        id: TaskId,
        error: String,
        duration_ms: u64,
    },
    TaskCancelled {
        id: TaskId,
    },
    /// A timed-out worker was abandoned and its slot handed to a fresh one
    WorkerReplaced {
        id: TaskId,
    },
}

/// Snapshot returned by `BackgroundProcessor::get_queue_stats`
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: u64,
    pub workers_replaced: u64,
    /// Timed-out bodies still running and holding their slot
    pub abandoned_workers: usize,
    pub active_workers: usize,
    pub max_workers: usize,
    /// Averages over completed tasks only
    pub average_wait_ms: f64,
    pub average_processing_ms: f64,
    pub paused: bool,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_display() {
        assert_eq!(TaskKind::Compression.to_string(), "compression");
        assert_eq!(
            TaskKind::Custom("reindex".into()).to_string(),
            "custom:reindex"
        );
    }

    #[test]
    fn test_status_finished() {
        assert!(!TaskStatus::Queued.is_finished());
        assert!(!TaskStatus::Running.is_finished());
        assert!(TaskStatus::Cancelled.is_finished());
    }

    #[test]
    fn test_spec_default_timeout() {
        let spec = TaskSpec::new(TaskKind::Compute, serde_json::json!({"n": 1}));
        let task = Task::new(Uuid::new_v4(), spec, Duration::from_secs(5));
        assert_eq!(task.timeout, Duration::from_secs(5));
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.wait_time().is_none());

        let spec = TaskSpec::from_fn(TaskKind::Compute, || Ok(serde_json::Value::Null))
            .with_timeout(Duration::from_millis(10))
            .with_priority(TaskPriority::High);
        let task = Task::new(Uuid::new_v4(), spec, Duration::from_secs(5));
        assert_eq!(task.timeout, Duration::from_millis(10));
        assert_eq!(task.priority, TaskPriority::High);
        assert!(task.job.is_some());
    }

    #[test]
    fn test_error_display() {
        let err = TaskError::Timeout { duration_ms: 50 };
        assert_eq!(err.to_string(), "Task timed out after 50ms");
        let err = TaskError::NoHandler(TaskKind::Indexing);
        assert!(err.to_string().contains("indexing"));
    }
}
