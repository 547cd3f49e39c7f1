//! Performance monitor
//!
//! Keeps rolling histories of CPU, memory and scheduler lag, aggregates
//! operation and render timings, and turns both into a health score and
//! suggestions.

use crate::config::MonitorConfig;
use crate::events::EventBus;
use crate::monitor::history::RollingHistory;
use crate::monitor::sampler::SystemSampler;
use crate::monitor::types::{
    Metric, MonitorEvent, PerformanceSummary, SystemSample, TimedValue, TimingRecord, TimingStats,
};
use crate::types::{Severity, Suggestion, SuggestionCategory};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Window used for summary averages
pub const SUMMARY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Number of slowest operations/renders listed in a summary
const SLOWEST_LISTED: usize = 5;

const CPU_PENALTY_CAP: f64 = 30.0;
const MEMORY_PENALTY_CAP: f64 = 30.0;
const LAG_PENALTY_CAP: f64 = 20.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[derive(Clone, Copy)]
enum TimingKind {
    Operation,
    Render,
}

struct MonitorState {
    cpu: RollingHistory<TimedValue>,
    memory: RollingHistory<TimedValue>,
    lag: RollingHistory<TimedValue>,
    operations: HashMap<String, TimingStats>,
    renders: HashMap<String, TimingStats>,
    recent_operations: RollingHistory<TimingRecord>,
    recent_renders: RollingHistory<TimingRecord>,
}

/// Collects system samples and operation timings
pub struct PerformanceMonitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    events: EventBus<MonitorEvent>,
    started_at: Instant,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let state = MonitorState {
            cpu: RollingHistory::new(config.history_size),
            memory: RollingHistory::new(config.history_size),
            lag: RollingHistory::new(config.history_size),
            operations: HashMap::new(),
            renders: HashMap::new(),
            recent_operations: RollingHistory::new(config.recent_operations),
            recent_renders: RollingHistory::new(config.recent_renders),
        };
        Self {
            config,
            state: Mutex::new(state),
            events: EventBus::new(),
            started_at: Instant::now(),
            sampler: Mutex::new(None),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MonitorConfig::default())
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> mpsc::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Start sampling the process every `interval` (configured default if `None`)
    pub fn start_monitoring(self: &Arc<Self>, interval: Option<Duration>) {
        let mut sampler = lock(&self.sampler);
        if sampler.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let period = interval.unwrap_or(Duration::from_millis(self.config.sample_interval_ms));
        let weak = Arc::downgrade(self);
        *sampler = Some(tokio::spawn(async move {
            let mut system = SystemSampler::new();
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let sample = system.sample().await;
                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                monitor.record_system_sample(sample);
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "performance sampling started");
    }

    pub fn stop_monitoring(&self) {
        if let Some(handle) = lock(&self.sampler).take() {
            handle.abort();
            debug!("performance sampling stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.sampler)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Append a system sample and raise threshold events
    pub fn record_system_sample(&self, sample: SystemSample) {
        self.record_system_sample_at(sample, Utc::now());
    }

    pub(crate) fn record_system_sample_at(&self, sample: SystemSample, at: DateTime<Utc>) {
        {
            let mut state = lock(&self.state);
            state.cpu.push(TimedValue {
                timestamp: at,
                value: sample.cpu_percent,
            });
            state.memory.push(TimedValue {
                timestamp: at,
                value: sample.memory_bytes as f64,
            });
            state.lag.push(TimedValue {
                timestamp: at,
                value: sample.event_loop_lag_ms,
            });
        }

        let checks = [
            (Metric::Cpu, sample.cpu_percent, self.config.cpu_threshold_pct),
            (
                Metric::Memory,
                sample.memory_bytes as f64,
                self.config.memory_threshold_bytes as f64,
            ),
            (
                Metric::EventLoopLag,
                sample.event_loop_lag_ms,
                self.config.event_loop_lag_threshold_ms,
            ),
        ];
        for (metric, value, threshold) in checks {
            if value > threshold {
                warn!(?metric, value, threshold, "performance threshold exceeded");
                self.events.emit(MonitorEvent::ThresholdExceeded {
                    metric,
                    value,
                    threshold,
                });
            }
        }
    }

    /// Record how long a named operation took
    pub fn record_operation(
        &self,
        name: &str,
        duration_ms: f64,
        metadata: Option<serde_json::Value>,
    ) {
        self.record_timing(TimingKind::Operation, name, duration_ms, metadata);
    }

    /// Record how long a named render took
    pub fn record_render(&self, name: &str, duration_ms: f64, metadata: Option<serde_json::Value>) {
        self.record_timing(TimingKind::Render, name, duration_ms, metadata);
    }

    fn record_timing(
        &self,
        kind: TimingKind,
        name: &str,
        duration_ms: f64,
        metadata: Option<serde_json::Value>,
    ) {
        let timestamp = Utc::now();
        let record = TimingRecord {
            name: name.to_string(),
            duration_ms,
            timestamp,
            metadata,
        };
        {
            let mut state = lock(&self.state);
            let state = &mut *state;
            let (aggregates, recent) = match kind {
                TimingKind::Operation => (&mut state.operations, &mut state.recent_operations),
                TimingKind::Render => (&mut state.renders, &mut state.recent_renders),
            };
            aggregates
                .entry(name.to_string())
                .or_insert_with(|| TimingStats::new(name))
                .record_at(duration_ms, timestamp);
            recent.push(record);
        }

        let (threshold_ms, event) = match kind {
            TimingKind::Operation => {
                let threshold_ms = self.config.response_time_threshold_ms;
                (
                    threshold_ms,
                    MonitorEvent::SlowOperation {
                        name: name.to_string(),
                        duration_ms,
                        threshold_ms,
                    },
                )
            }
            TimingKind::Render => {
                let threshold_ms = self.config.render_time_threshold_ms;
                (
                    threshold_ms,
                    MonitorEvent::SlowRender {
                        name: name.to_string(),
                        duration_ms,
                        threshold_ms,
                    },
                )
            }
        };
        if duration_ms > threshold_ms {
            debug!(name, duration_ms, threshold_ms, "slow timing recorded");
            self.events.emit(event);
        }
    }

    pub fn get_summary(&self) -> PerformanceSummary {
        let now = Utc::now();
        let cutoff = now - to_chrono(SUMMARY_WINDOW);
        let state = lock(&self.state);

        let average_cpu_percent = average_since(&state.cpu, cutoff);
        let average_memory_bytes = average_since(&state.memory, cutoff);
        let event_loop_lag_ms = state.lag.latest().map(|s| s.value).unwrap_or(0.0);
        let samples_in_window = state.cpu.iter().filter(|s| s.timestamp >= cutoff).count();

        let health_score = self.health_score(average_cpu_percent, average_memory_bytes, event_loop_lag_ms);

        PerformanceSummary {
            timestamp: now,
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            is_monitoring: self.is_monitoring(),
            average_cpu_percent,
            average_memory_bytes,
            event_loop_lag_ms,
            samples_in_window,
            total_operations: state.operations.values().map(|s| s.count).sum(),
            total_renders: state.renders.values().map(|s| s.count).sum(),
            slowest_operations: slowest(&state.operations),
            slowest_renders: slowest(&state.renders),
            health_score,
        }
    }

    /// 100 minus capped penalties for CPU, memory and lag over threshold
    fn health_score(&self, cpu: f64, memory: f64, lag: f64) -> f64 {
        let mut score = 100.0;

        let cpu_threshold = self.config.cpu_threshold_pct;
        if cpu > cpu_threshold {
            score -= ((cpu - cpu_threshold) * 2.0).min(CPU_PENALTY_CAP);
        }

        let memory_threshold = self.config.memory_threshold_bytes as f64;
        if memory_threshold > 0.0 && memory > memory_threshold {
            let percent_over = (memory / memory_threshold - 1.0) * 100.0;
            score -= percent_over.min(MEMORY_PENALTY_CAP);
        }

        let lag_threshold = self.config.event_loop_lag_threshold_ms;
        if lag > lag_threshold {
            score -= ((lag - lag_threshold) / 10.0).min(LAG_PENALTY_CAP);
        }

        score.max(0.0)
    }

    /// Suggestions derived from the current summary
    pub fn get_optimization_suggestions(&self) -> Vec<Suggestion> {
        let summary = self.get_summary();
        let mut suggestions = Vec::new();

        if summary.average_cpu_percent > self.config.cpu_threshold_pct {
            suggestions.push(
                Suggestion::new(
                    SuggestionCategory::Performance,
                    Severity::High,
                    "High CPU usage",
                    format!(
                        "Average CPU usage is {:.1}% (threshold {:.1}%)",
                        summary.average_cpu_percent, self.config.cpu_threshold_pct
                    ),
                )
                .with_action("Move CPU-bound work to background tasks")
                .with_action("Reduce sampling and optimization frequency"),
            );
        }

        let memory_threshold = self.config.memory_threshold_bytes as f64;
        if summary.average_memory_bytes > memory_threshold {
            suggestions.push(
                Suggestion::new(
                    SuggestionCategory::Memory,
                    Severity::High,
                    "High memory usage",
                    format!(
                        "Average memory usage is {:.1} MiB (threshold {:.1} MiB)",
                        summary.average_memory_bytes / 1_048_576.0,
                        memory_threshold / 1_048_576.0
                    ),
                )
                .with_action("Lower cache memory budget")
                .with_action("Release pooled objects"),
            );
        }

        if summary.event_loop_lag_ms > self.config.event_loop_lag_threshold_ms {
            suggestions.push(
                Suggestion::new(
                    SuggestionCategory::Performance,
                    Severity::Medium,
                    "Scheduler lag",
                    format!(
                        "Runtime lag is {:.1}ms (threshold {:.1}ms)",
                        summary.event_loop_lag_ms, self.config.event_loop_lag_threshold_ms
                    ),
                )
                .with_action("Avoid blocking calls on async tasks")
                .with_action("Use spawn_blocking for synchronous work"),
            );
        }

        for op in summary
            .slowest_operations
            .iter()
            .filter(|op| op.average_ms > self.config.response_time_threshold_ms)
        {
            suggestions.push(
                Suggestion::new(
                    SuggestionCategory::Performance,
                    Severity::Medium,
                    format!("Slow operation: {}", op.name),
                    format!(
                        "'{}' averages {:.0}ms over {} calls",
                        op.name, op.average_ms, op.count
                    ),
                )
                .with_action("Cache the result of this operation")
                .with_action("Run it as a background task"),
            );
        }

        for render in summary
            .slowest_renders
            .iter()
            .filter(|r| r.average_ms > self.config.render_time_threshold_ms)
        {
            suggestions.push(
                Suggestion::new(
                    SuggestionCategory::Performance,
                    Severity::Low,
                    format!("Slow render: {}", render.name),
                    format!(
                        "'{}' averages {:.0}ms over {} renders",
                        render.name, render.average_ms, render.count
                    ),
                )
                .with_action("Reduce the amount of content rendered at once"),
            );
        }

        suggestions
    }

    /// Drop samples and timing records older than `max_age`
    ///
    /// Aggregates for names not recorded since the cutoff go too. Returns how
    /// many samples and records were removed.
    pub fn prune_history(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - to_chrono(max_age);
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let mut removed = 0;
        for history in [&mut state.cpu, &mut state.memory, &mut state.lag] {
            removed += history.retain(|s| s.timestamp >= cutoff);
        }
        removed += state.recent_operations.retain(|r| r.timestamp >= cutoff);
        removed += state.recent_renders.retain(|r| r.timestamp >= cutoff);
        state.operations.retain(|_, s| s.last_recorded >= cutoff);
        state.renders.retain(|_, s| s.last_recorded >= cutoff);
        removed
    }

    /// Number of distinct operation and render names with aggregates
    pub fn tracked_names(&self) -> usize {
        let state = lock(&self.state);
        state.operations.len() + state.renders.len()
    }

    /// Most recent operation timings, oldest first
    pub fn recent_operations(&self) -> Vec<TimingRecord> {
        lock(&self.state).recent_operations.iter().cloned().collect()
    }

    pub fn recent_renders(&self) -> Vec<TimingRecord> {
        lock(&self.state).recent_renders.iter().cloned().collect()
    }

    /// Number of system samples currently held
    pub fn sample_count(&self) -> usize {
        lock(&self.state).cpu.len()
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("config", &self.config)
            .field("is_monitoring", &self.is_monitoring())
            .finish()
    }
}

fn average_since(history: &RollingHistory<TimedValue>, cutoff: DateTime<Utc>) -> f64 {
    let (sum, count) = history
        .iter()
        .filter(|s| s.timestamp >= cutoff)
        .fold((0.0, 0usize), |(sum, count), s| (sum + s.value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn slowest(aggregates: &HashMap<String, TimingStats>) -> Vec<TimingStats> {
    let mut all: Vec<TimingStats> = aggregates.values().cloned().collect();
    all.sort_by(|a, b| b.average_ms.total_cmp(&a.average_ms));
    all.truncate(SLOWEST_LISTED);
    all
}
