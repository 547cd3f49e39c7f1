//! Priority queue with running/completed/failed buckets

use crate::tasks::types::{Dispatch, Task, TaskId, TaskInfo, TaskResult, TaskStatus};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Task bookkeeping for the background processor
///
/// Pending tasks are kept sorted by priority, FIFO among equals. Finished
/// buckets are capped at `history_limit` and drop their oldest records.
pub(crate) struct TaskQueue {
    pending: VecDeque<Task>,
    running: HashMap<TaskId, Task>,
    completed: VecDeque<Task>,
    failed: VecDeque<Task>,
    history_limit: usize,
    total_wait: Duration,
    total_processing: Duration,
    averaged: u64,
}

impl TaskQueue {
    pub fn new(history_limit: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            running: HashMap::new(),
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            history_limit,
            total_wait: Duration::ZERO,
            total_processing: Duration::ZERO,
            averaged: 0,
        }
    }

    /// Insert behind every task of equal or higher priority
    pub fn enqueue(&mut self, task: Task) -> usize {
        let position = self
            .pending
            .iter()
            .position(|queued| queued.priority < task.priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(position, task);
        self.pending.len()
    }

    /// Move the highest-priority task to running and hand out its body
    pub fn start_next(&mut self) -> Option<Dispatch> {
        let mut task = self.pending.pop_front()?;
        let now = Instant::now();
        task.status = TaskStatus::Running;
        task.started_at = Some(now);

        let dispatch = Dispatch {
            id: task.id,
            kind: task.kind.clone(),
            payload: std::mem::take(&mut task.payload),
            job: task.job.take(),
            timeout: task.timeout,
        };
        self.running.insert(task.id, task);
        Some(dispatch)
    }

    /// Record the outcome of a running task
    pub fn finish(&mut self, id: TaskId, result: &TaskResult) -> Option<TaskInfo> {
        let mut task = self.running.remove(&id)?;
        task.finished_at = Some(Instant::now());
        match result {
            Ok(_) => {
                task.status = TaskStatus::Completed;
                if let (Some(wait), Some(processing)) = (task.wait_time(), task.processing_time()) {
                    self.total_wait += wait;
                    self.total_processing += processing;
                    self.averaged += 1;
                }
                let info = task.info();
                push_bounded(&mut self.completed, task, self.history_limit);
                Some(info)
            }
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error = Some(err.to_string());
                let info = task.info();
                push_bounded(&mut self.failed, task, self.history_limit);
                Some(info)
            }
        }
    }

    /// Cancel a task that has not started yet
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let Some(position) = self.pending.iter().position(|t| t.id == id) else {
            return false;
        };
        let Some(mut task) = self.pending.remove(position) else {
            return false;
        };
        task.status = TaskStatus::Cancelled;
        task.finished_at = Some(Instant::now());
        task.job = None;
        push_bounded(&mut self.failed, task, self.history_limit);
        true
    }

    /// Cancel every pending task, returning their ids
    pub fn cancel_all(&mut self) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self.pending.iter().map(|t| t.id).collect();
        for id in &ids {
            self.cancel(*id);
        }
        ids
    }

    pub fn get(&self, id: TaskId) -> Option<TaskInfo> {
        self.pending
            .iter()
            .find(|t| t.id == id)
            .or_else(|| self.running.get(&id))
            .or_else(|| self.completed.iter().find(|t| t.id == id))
            .or_else(|| self.failed.iter().find(|t| t.id == id))
            .map(Task::info)
    }

    /// Drop finished records, keeping the newest `keep` of each bucket
    pub fn prune_finished(&mut self, keep: usize) -> usize {
        let mut pruned = 0;
        for bucket in [&mut self.completed, &mut self.failed] {
            while bucket.len() > keep {
                bucket.pop_front();
                pruned += 1;
            }
        }
        pruned
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Failed and cancelled counts, in that order
    pub fn failed_counts(&self) -> (usize, usize) {
        let cancelled = self
            .failed
            .iter()
            .filter(|t| t.status == TaskStatus::Cancelled)
            .count();
        (self.failed.len() - cancelled, cancelled)
    }

    /// Mean of start minus submit over completed tasks
    pub fn average_wait_ms(&self) -> f64 {
        average_ms(self.total_wait, self.averaged)
    }

    /// Mean of finish minus start over completed tasks
    pub fn average_processing_ms(&self) -> f64 {
        average_ms(self.total_processing, self.averaged)
    }
}

fn push_bounded(bucket: &mut VecDeque<Task>, task: Task, limit: usize) {
    bucket.push_back(task);
    while bucket.len() > limit {
        bucket.pop_front();
    }
}

fn average_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / count as f64
    }
}
