//! Priority background processor with a bounded worker pool

use crate::config::BackgroundConfig;
use crate::events::EventBus;
use crate::tasks::queue::TaskQueue;
use crate::tasks::types::{
    QueueStats, Task, TaskError, TaskEvent, TaskId, TaskInfo, TaskKind, TaskPriority, TaskResult,
    TaskSpec,
};
use crate::tasks::worker::{self, HandlerRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Future resolving to a task's outcome
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    receiver: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Responder dropped without an answer: the processor went away
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Shutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct ProcessorState {
    queue: TaskQueue,
    responders: HashMap<TaskId, oneshot::Sender<TaskResult>>,
    paused: bool,
    shut_down: bool,
    timed_out: u64,
    workers_replaced: u64,
    abandoned_workers: usize,
}

struct ProcessorInner {
    config: BackgroundConfig,
    max_workers: usize,
    slots: Arc<Semaphore>,
    state: Mutex<ProcessorState>,
    registry: HandlerRegistry,
    events: EventBus<TaskEvent>,
}

impl ProcessorInner {
    fn lock_state(&self) -> MutexGuard<'_, ProcessorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start queued tasks while worker slots are free
    fn dispatch(self: &Arc<Self>) {
        loop {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                return;
            };
            let next = {
                let mut state = self.lock_state();
                if state.paused || state.shut_down {
                    None
                } else {
                    state.queue.start_next()
                }
            };
            let Some(dispatch) = next else {
                return;
            };

            debug!(id = %dispatch.id, kind = %dispatch.kind, "task started");
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let id = dispatch.id;
                let execution = worker::execute(&inner.registry, dispatch).await;
                match execution.straggler {
                    None => {
                        drop(permit);
                        inner.finish(id, execution.result);
                    }
                    Some(body) => {
                        // The caller hears about the timeout now; the slot
                        // stays taken until the abandoned thread exits.
                        inner.lock_state().abandoned_workers += 1;
                        inner.finish(id, execution.result);
                        let _ = body.await;
                        inner.lock_state().abandoned_workers -= 1;
                        debug!(%id, "abandoned worker exited");
                        drop(permit);
                    }
                }
                inner.dispatch();
            });
        }
    }

    fn finish(&self, id: TaskId, result: TaskResult) {
        let timed_out = matches!(result, Err(TaskError::Timeout { .. }));
        let (info, responder) = {
            let mut state = self.lock_state();
            if timed_out {
                state.timed_out += 1;
                state.workers_replaced += 1;
            }
            (state.queue.finish(id, &result), state.responders.remove(&id))
        };
        let duration_ms = info.and_then(|i| i.processing_ms).unwrap_or(0);

        match &result {
            Ok(_) => {
                debug!(%id, duration_ms, "task completed");
                self.events.emit(TaskEvent::TaskCompleted { id, duration_ms });
            }
            Err(err) => {
                warn!(%id, duration_ms, error = %err, "task failed");
                self.events.emit(TaskEvent::TaskFailed {
                    id,
                    error: err.to_string(),
                    duration_ms,
                });
                if timed_out {
                    self.events.emit(TaskEvent::WorkerReplaced { id });
                }
            }
        }

        if let Some(responder) = responder {
            let _ = responder.send(result);
        }
    }
}

/// Runs submitted tasks by priority with at most `max_workers` in flight
///
/// A task body that outlives its timeout keeps its worker slot until the
/// thread finishes, so no more than `max_workers` bodies ever run at once.
/// Cloning is cheap; clones share the same queue and workers. Must be used
/// from within a tokio runtime.
#[derive(Clone)]
pub struct BackgroundProcessor {
    inner: Arc<ProcessorInner>,
}

impl BackgroundProcessor {
    pub fn new(config: BackgroundConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        let queue = TaskQueue::new(config.history_limit);
        Self {
            inner: Arc::new(ProcessorInner {
                config,
                max_workers,
                slots: Arc::new(Semaphore::new(max_workers)),
                state: Mutex::new(ProcessorState {
                    queue,
                    responders: HashMap::new(),
                    paused: false,
                    shut_down: false,
                    timed_out: 0,
                    workers_replaced: 0,
                    abandoned_workers: 0,
                }),
                registry: HandlerRegistry::new(),
                events: EventBus::new(),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BackgroundConfig::default())
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> mpsc::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Register the handler used for tasks of `kind` submitted without a body
    pub fn register_handler<F>(&self, kind: TaskKind, handler: F)
    where
        F: Fn(Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.inner.registry.register(kind, handler);
    }

    /// Queue a task; it starts once a worker is free and nothing more urgent is waiting
    ///
    /// Priority decides among tasks that are waiting together. On a
    /// multi-threaded runtime an idle worker may pick up a task before the
    /// next `submit_task` call lands; use `submit_batch` when a group must be
    /// ordered as a whole.
    pub fn submit_task(&self, spec: TaskSpec) -> TaskHandle {
        let (handle, queued) = {
            let mut state = self.inner.lock_state();
            self.enqueue_locked(&mut state, spec)
        };
        if let Some(event) = queued {
            self.inner.events.emit(event);
            self.schedule_dispatch();
        }
        handle
    }

    /// Queue several tasks at once
    ///
    /// All of them are enqueued under one lock before dispatch is scheduled,
    /// so they start in priority order (FIFO among equals) on any runtime.
    /// Handles are returned in submission order.
    pub fn submit_batch(&self, specs: Vec<TaskSpec>) -> Vec<TaskHandle> {
        let mut handles = Vec::with_capacity(specs.len());
        let mut queued = Vec::with_capacity(specs.len());
        {
            let mut state = self.inner.lock_state();
            for spec in specs {
                let (handle, event) = self.enqueue_locked(&mut state, spec);
                handles.push(handle);
                queued.extend(event);
            }
        }
        if !queued.is_empty() {
            for event in queued {
                self.inner.events.emit(event);
            }
            self.schedule_dispatch();
        }
        handles
    }

    fn enqueue_locked(
        &self,
        state: &mut ProcessorState,
        spec: TaskSpec,
    ) -> (TaskHandle, Option<TaskEvent>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = oneshot::channel();
        let handle = TaskHandle { id, receiver };
        if state.shut_down {
            let _ = sender.send(Err(TaskError::Shutdown));
            return (handle, None);
        }

        let kind = spec.kind.clone();
        let priority = spec.priority;
        let task = Task::new(id, spec, self.inner.config.default_timeout());
        state.responders.insert(id, sender);
        let queue_len = state.queue.enqueue(task);
        debug!(%id, %kind, %priority, queue_len, "task queued");
        (
            handle,
            Some(TaskEvent::TaskQueued {
                id,
                kind,
                priority,
                queue_len,
            }),
        )
    }

    /// Queue a closure as a `Compute` task
    pub fn submit_fn<F>(&self, priority: TaskPriority, f: F) -> TaskHandle
    where
        F: FnOnce() -> std::result::Result<Value, String> + Send + 'static,
    {
        self.submit_task(TaskSpec::from_fn(TaskKind::Compute, f).with_priority(priority))
    }

    /// Cancel a task that has not started
    ///
    /// Returns `false` for running, finished or unknown tasks.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let responder = {
            let mut state = self.inner.lock_state();
            if !state.queue.cancel(id) {
                return false;
            }
            state.responders.remove(&id)
        };
        if let Some(responder) = responder {
            let _ = responder.send(Err(TaskError::Cancelled { id }));
        }
        info!(%id, "task cancelled");
        self.inner.events.emit(TaskEvent::TaskCancelled { id });
        true
    }

    /// Stop starting new tasks; running ones carry on
    pub fn pause(&self) {
        self.inner.lock_state().paused = true;
    }

    pub fn resume(&self) {
        self.inner.lock_state().paused = false;
        self.schedule_dispatch();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock_state().paused
    }

    /// Reject new submissions and cancel everything still queued
    ///
    /// Running tasks finish normally. Returns how many queued tasks were
    /// cancelled.
    pub fn shutdown(&self) -> usize {
        let cancelled: Vec<(TaskId, Option<oneshot::Sender<TaskResult>>)> = {
            let mut state = self.inner.lock_state();
            state.shut_down = true;
            let ids = state.queue.cancel_all();
            ids.into_iter()
                .map(|id| (id, state.responders.remove(&id)))
                .collect()
        };

        let count = cancelled.len();
        for (id, responder) in cancelled {
            self.inner.events.emit(TaskEvent::TaskCancelled { id });
            if let Some(responder) = responder {
                let _ = responder.send(Err(TaskError::Shutdown));
            }
        }
        info!(cancelled = count, "background processor shut down");
        count
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock_state().shut_down
    }

    pub fn get_task(&self, id: TaskId) -> Option<TaskInfo> {
        self.inner.lock_state().queue.get(id)
    }

    /// Forget finished tasks beyond the newest `keep` per bucket
    pub fn prune_finished(&self, keep: usize) -> usize {
        self.inner.lock_state().queue.prune_finished(keep)
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        let state = self.inner.lock_state();
        let (failed, cancelled) = state.queue.failed_counts();
        QueueStats {
            queued: state.queue.pending_len(),
            running: state.queue.running_len(),
            completed: state.queue.completed_len(),
            failed,
            cancelled,
            timed_out: state.timed_out,
            workers_replaced: state.workers_replaced,
            abandoned_workers: state.abandoned_workers,
            active_workers: self.inner.max_workers - self.inner.slots.available_permits(),
            max_workers: self.inner.max_workers,
            average_wait_ms: state.queue.average_wait_ms(),
            average_processing_ms: state.queue.average_processing_ms(),
            paused: state.paused,
        }
    }

    fn schedule_dispatch(&self) {
        match Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move { inner.dispatch() });
            }
            Err(_) => warn!("no async runtime, task stays queued"),
        }
    }
}

impl std::fmt::Debug for BackgroundProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundProcessor")
            .field("max_workers", &self.inner.max_workers)
            .field("registry", &self.inner.registry)
            .finish()
    }
}
