//! Handler registry and single-task execution
//!
//! Every task kind runs through the same worker: the body is either the
//! closure supplied at submission or the handler registered for the kind.
//! Bodies run on the blocking pool under a timeout. A body that overruns is
//! abandoned: its caller gets the timeout at once, and the still-running
//! thread is handed back so its slot stays taken until it exits.

use crate::tasks::types::{Dispatch, Job, TaskError, TaskKind, TaskResult};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;

/// Handler invoked with a task's payload
pub type Handler = Arc<dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync>;

/// Map of task kind to handler
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskKind, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `kind`
    pub fn register<F>(&self, kind: TaskKind, handler: F)
    where
        F: Fn(Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::new(handler));
    }

    pub fn get(&self, kind: &TaskKind) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    pub fn contains(&self, kind: &TaskKind) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Outcome of one execution
pub(crate) struct Execution {
    pub result: TaskResult,
    /// Body still running after its timeout fired
    pub straggler: Option<JoinHandle<std::result::Result<Value, String>>>,
}

impl Execution {
    fn done(result: TaskResult) -> Self {
        Self {
            result,
            straggler: None,
        }
    }
}

/// Run one task to completion, failure or timeout
pub(crate) async fn execute(registry: &HandlerRegistry, dispatch: Dispatch) -> Execution {
    let job: Job = match dispatch.job {
        Some(job) => job,
        None => match registry.get(&dispatch.kind) {
            Some(handler) => {
                let payload = dispatch.payload;
                Box::new(move || handler(payload))
            }
            None => return Execution::done(Err(TaskError::NoHandler(dispatch.kind))),
        },
    };

    let mut handle = tokio::task::spawn_blocking(job);
    let outcome = tokio::time::timeout(dispatch.timeout, &mut handle).await;
    match outcome {
        Ok(Ok(Ok(value))) => Execution::done(Ok(value)),
        Ok(Ok(Err(message))) => Execution::done(Err(TaskError::Failed(message))),
        Ok(Err(join_error)) if join_error.is_panic() => Execution::done(Err(TaskError::Panicked(
            panic_message(join_error.into_panic()),
        ))),
        Ok(Err(_)) => Execution::done(Err(TaskError::Failed("worker was cancelled".to_string()))),
        Err(_) => Execution {
            result: Err(TaskError::Timeout {
                duration_ms: dispatch.timeout.as_millis() as u64,
            }),
            straggler: Some(handle),
        },
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn dispatch(kind: TaskKind, payload: Value, job: Option<Job>, timeout_ms: u64) -> Dispatch {
        Dispatch {
            id: Uuid::new_v4(),
            kind,
            payload,
            job,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn test_registry() {
        let registry = HandlerRegistry::new();
        assert!(!registry.contains(&TaskKind::Compute));
        registry.register(TaskKind::Compute, Ok);
        assert!(registry.contains(&TaskKind::Compute));
        assert_eq!(registry.kinds(), vec![TaskKind::Compute]);
    }

    #[tokio::test]
    async fn test_execute_with_handler() {
        let registry = HandlerRegistry::new();
        registry.register(TaskKind::Compute, |payload| {
            let n = payload["n"].as_u64().ok_or("missing n")?;
            Ok(json!(n * 2))
        });

        let run = execute(&registry, dispatch(TaskKind::Compute, json!({"n": 21}), None, 1000)).await;
        assert_eq!(run.result, Ok(json!(42)));
        assert!(run.straggler.is_none());

        let run = execute(&registry, dispatch(TaskKind::Compute, json!({}), None, 1000)).await;
        assert_eq!(run.result, Err(TaskError::Failed("missing n".into())));
    }

    #[tokio::test]
    async fn test_execute_without_handler() {
        let registry = HandlerRegistry::new();
        let run = execute(&registry, dispatch(TaskKind::Indexing, Value::Null, None, 1000)).await;
        assert_eq!(run.result, Err(TaskError::NoHandler(TaskKind::Indexing)));
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let registry = HandlerRegistry::new();
        let job: Job = Box::new(|| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::Null)
        });
        let run = execute(&registry, dispatch(TaskKind::Compute, Value::Null, Some(job), 20)).await;
        assert_eq!(run.result, Err(TaskError::Timeout { duration_ms: 20 }));

        // The abandoned body still runs to its own end
        let straggler = run.straggler.expect("timed-out body is handed back");
        assert_eq!(straggler.await.unwrap(), Ok(Value::Null));
    }

    #[tokio::test]
    async fn test_execute_panic_is_contained() {
        let registry = HandlerRegistry::new();
        let job: Job = Box::new(|| -> std::result::Result<Value, String> { panic!("kaboom") });
        let run = execute(&registry, dispatch(TaskKind::Compute, Value::Null, Some(job), 1000)).await;
        assert_eq!(run.result, Err(TaskError::Panicked("kaboom".into())));
    }
}
