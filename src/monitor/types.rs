//! Performance monitor data types

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One reading from the system sampler
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemSample {
    /// Process CPU usage normalised to 0-100 across all cores
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub event_loop_lag_ms: f64,
}

/// Timestamped scalar kept in a rolling history
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimedValue {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Metric named in threshold events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cpu,
    Memory,
    EventLoopLag,
}

/// Single recorded operation or render
#[derive(Debug, Clone, Serialize)]
pub struct TimingRecord {
    pub name: String,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Running aggregate for one named operation or render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingStats {
    pub name: String,
    pub count: u64,
    pub total_ms: f64,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub last_recorded: DateTime<Utc>,
}

impl TimingStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: 0,
            total_ms: 0.0,
            average_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            last_recorded: Utc::now(),
        }
    }

    pub fn record(&mut self, duration_ms: f64) {
        self.record_at(duration_ms, Utc::now());
    }

    pub fn record_at(&mut self, duration_ms: f64, at: DateTime<Utc>) {
        self.last_recorded = at;
        self.count += 1;
        self.total_ms += duration_ms;
        self.average_ms = self.total_ms / self.count as f64;
        self.min_ms = self.min_ms.min(duration_ms);
        self.max_ms = self.max_ms.max(duration_ms);
    }
}

/// Events emitted by the performance monitor
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    SlowOperation {
        name: String,
        duration_ms: f64,
        threshold_ms: f64,
    },
    SlowRender {
        name: String,
        duration_ms: f64,
        threshold_ms: f64,
    },
    ThresholdExceeded {
        metric: Metric,
        value: f64,
        threshold: f64,
    },
}

/// Snapshot returned by `PerformanceMonitor::get_summary`
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub timestamp: DateTime<Utc>,
    pub uptime_ms: u64,
    pub is_monitoring: bool,
    /// Averages over the recent window
    pub average_cpu_percent: f64,
    pub average_memory_bytes: f64,
    pub event_loop_lag_ms: f64,
    pub samples_in_window: usize,
    pub total_operations: u64,
    pub total_renders: u64,
    pub slowest_operations: Vec<TimingStats>,
    pub slowest_renders: Vec<TimingStats>,
    /// 0 to 100, higher is healthier
    pub health_score: f64,
}
