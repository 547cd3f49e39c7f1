//! Optimizer data types

use crate::cache::CacheStats;
use crate::config::Config;
use crate::memory::MemoryStats;
use crate::monitor::PerformanceSummary;
use crate::tasks::QueueStats;
use crate::types::{Suggestion, SuggestionCategory};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Version tag of `PerformanceExport`
pub const EXPORT_VERSION: &str = "1.0";

/// One step of an optimization cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStep {
    Cache,
    Memory,
    BackgroundTasks,
    Monitor,
}

/// Outcome of a single step
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: OptimizationStep,
    pub success: bool,
    pub duration_ms: u64,
    /// Step-specific report, `null` on failure
    pub details: serde_json::Value,
    pub error: Option<String>,
}

/// Record of a completed optimization cycle
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationRun {
    /// Sequence number, starting at 1
    pub run: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
}

impl OptimizationRun {
    pub fn successful_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }

    pub fn failed_steps(&self) -> usize {
        self.steps.len() - self.successful_steps()
    }
}

/// Result of `Optimizer::perform_optimization`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OptimizationOutcome {
    Completed(OptimizationRun),
    /// Another cycle was running; nothing was done
    AlreadyInProgress,
}

impl OptimizationOutcome {
    pub fn run(&self) -> Option<&OptimizationRun> {
        match self {
            OptimizationOutcome::Completed(run) => Some(run),
            OptimizationOutcome::AlreadyInProgress => None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, OptimizationOutcome::AlreadyInProgress)
    }
}

/// Optimizer's own state as reported in metrics
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerState {
    pub is_optimizing: bool,
    pub is_running: bool,
    pub run_count: u64,
    pub last_optimization: Option<DateTime<Utc>>,
}

/// Aggregated snapshot of every owned component
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub timestamp: DateTime<Utc>,
    pub cache: CacheStats,
    pub memory: MemoryStats,
    pub performance: PerformanceSummary,
    pub background: QueueStats,
    pub optimizer: OptimizerState,
}

/// What `apply_auto_optimizations` did for one suggestion
#[derive(Debug, Clone, Serialize)]
pub struct AutoOptimizationResult {
    pub suggestion: String,
    pub category: SuggestionCategory,
    pub action: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Diagnostics snapshot for telemetry export
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceExport {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: PerformanceMetrics,
    pub suggestions: Vec<Suggestion>,
    /// Most recent optimization runs, oldest first
    pub history: Vec<OptimizationRun>,
    pub config: Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(success: bool) -> StepResult {
        StepResult {
            step: OptimizationStep::Cache,
            success,
            duration_ms: 1,
            details: serde_json::Value::Null,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_run_step_counts() {
        let run = OptimizationRun {
            run: 1,
            started_at: Utc::now(),
            duration_ms: 3,
            steps: vec![step(true), step(false), step(true)],
        };
        assert_eq!(run.successful_steps(), 2);
        assert_eq!(run.failed_steps(), 1);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(OptimizationOutcome::AlreadyInProgress).unwrap();
        assert_eq!(json["status"], "already_in_progress");
        assert!(OptimizationOutcome::AlreadyInProgress.is_in_progress());
        assert!(OptimizationOutcome::AlreadyInProgress.run().is_none());
    }
}
