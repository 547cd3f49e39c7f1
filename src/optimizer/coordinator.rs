//! Optimization coordinator
//!
//! Owns one of each component, runs the periodic optimization cycle and
//! aggregates metrics and suggestions across all of them.

use crate::cache::{spawn_sweeper, Cache};
use crate::config::Config;
use crate::errors::Result;
use crate::memory::MemoryManager;
use crate::monitor::{PerformanceMonitor, SUMMARY_WINDOW};
use crate::optimizer::suggestions::{build_suggestions, MAX_QUEUED_TASKS};
use crate::optimizer::types::{
    AutoOptimizationResult, OptimizationOutcome, OptimizationRun, OptimizationStep,
    OptimizerState, PerformanceExport, PerformanceMetrics, StepResult, EXPORT_VERSION,
};
use crate::tasks::BackgroundProcessor;
use crate::types::{Suggestion, SuggestionCategory};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs returned by `export_performance_data`
const EXPORTED_RUNS: usize = 10;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-progress flag when a cycle ends, however it ends
struct OptimizingGuard<'a>(&'a AtomicBool);

impl Drop for OptimizingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Coordinates the cache, memory manager, background processor and monitor
pub struct Optimizer {
    config: Config,
    cache: Arc<Cache>,
    memory: Arc<MemoryManager>,
    background: BackgroundProcessor,
    monitor: Arc<PerformanceMonitor>,
    is_optimizing: AtomicBool,
    run_count: AtomicU64,
    last_optimization: Mutex<Option<DateTime<Utc>>>,
    history: Mutex<VecDeque<OptimizationRun>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Optimizer {
    /// Build every component from `config`
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(Cache::new(config.cache.clone()));
        let memory = Arc::new(MemoryManager::new(config.memory.clone()));
        let background = BackgroundProcessor::new(config.background.clone());
        let monitor = Arc::new(PerformanceMonitor::new(config.monitor.clone()));
        Ok(Self::with_components(config, cache, memory, background, monitor))
    }

    /// Coordinate components built elsewhere
    ///
    /// Registers a reclamation hook that purges expired cache entries.
    pub fn with_components(
        config: Config,
        cache: Arc<Cache>,
        memory: Arc<MemoryManager>,
        background: BackgroundProcessor,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        let weak_cache = Arc::downgrade(&cache);
        memory.register_reclaim_hook("cache-expired", move || {
            weak_cache
                .upgrade()
                .map(|cache| cache.purge_expired().1)
                .unwrap_or(0)
        });

        Self {
            config,
            cache,
            memory,
            background,
            monitor,
            is_optimizing: AtomicBool::new(false),
            run_count: AtomicU64::new(0),
            last_optimization: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn background(&self) -> &BackgroundProcessor {
        &self.background
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn is_optimizing(&self) -> bool {
        self.is_optimizing.load(Ordering::Acquire)
    }

    /// Start the cache sweeper, memory and performance monitoring, and the
    /// periodic optimization cycle
    pub fn start(self: &Arc<Self>) {
        let mut tasks = lock(&self.tasks);
        if tasks.iter().any(|h| !h.is_finished()) {
            return;
        }
        tasks.clear();

        self.memory.start_monitoring();
        self.monitor.start_monitoring(None);
        tasks.push(spawn_sweeper(
            &self.cache,
            Duration::from_millis(self.config.cache.sweep_interval_ms),
        ));

        let weak = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.optimizer.interval_ms);
        let auto_apply = self.config.optimizer.auto_apply_suggestions;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(optimizer) = weak.upgrade() else {
                    break;
                };
                optimizer.perform_optimization().await;
                if auto_apply {
                    optimizer.apply_auto_optimizations();
                }
            }
        }));
        info!(
            interval_ms = period.as_millis() as u64,
            auto_apply, "optimizer started"
        );
    }

    pub fn stop(&self) {
        let handles: Vec<_> = lock(&self.tasks).drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            handle.abort();
        }
        self.memory.stop_monitoring();
        self.monitor.stop_monitoring();
        info!("optimizer stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.tasks).iter().any(|h| !h.is_finished())
    }

    /// Run one optimization cycle
    ///
    /// Returns `AlreadyInProgress` at once if another cycle is running. Each
    /// step runs on the blocking pool; a failing step is recorded and the
    /// remaining steps still run.
    pub async fn perform_optimization(&self) -> OptimizationOutcome {
        if self
            .is_optimizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("optimization already in progress");
            return OptimizationOutcome::AlreadyInProgress;
        }
        let _guard = OptimizingGuard(&self.is_optimizing);

        let started_at = Utc::now();
        let start = Instant::now();
        let mut steps = Vec::with_capacity(4);

        let cache = Arc::clone(&self.cache);
        steps.push(
            run_step(OptimizationStep::Cache, move || {
                Ok(serde_json::to_value(cache.optimize())?)
            })
            .await,
        );

        let memory = Arc::clone(&self.memory);
        steps.push(
            run_step(OptimizationStep::Memory, move || {
                Ok(serde_json::to_value(memory.optimize_memory())?)
            })
            .await,
        );

        let background = self.background.clone();
        steps.push(
            run_step(OptimizationStep::BackgroundTasks, move || {
                let stats = background.get_queue_stats();
                if stats.queued > MAX_QUEUED_TASKS {
                    warn!(
                        queued = stats.queued,
                        active = stats.active_workers,
                        "background queue backlog"
                    );
                }
                Ok(json!({
                    "queued": stats.queued,
                    "running": stats.running,
                    "active_workers": stats.active_workers,
                    "max_workers": stats.max_workers,
                    "backlog": stats.queued > MAX_QUEUED_TASKS,
                }))
            })
            .await,
        );

        let monitor = Arc::clone(&self.monitor);
        steps.push(
            run_step(OptimizationStep::Monitor, move || {
                let pruned = monitor.prune_history(SUMMARY_WINDOW);
                Ok(json!({ "pruned_entries": pruned }))
            })
            .await,
        );

        let run = OptimizationRun {
            run: self.run_count.fetch_add(1, Ordering::AcqRel) + 1,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            steps,
        };
        info!(
            run = run.run,
            duration_ms = run.duration_ms,
            succeeded = run.successful_steps(),
            failed = run.failed_steps(),
            "optimization cycle finished"
        );

        *lock(&self.last_optimization) = Some(started_at);
        {
            let mut history = lock(&self.history);
            history.push_back(run.clone());
            while history.len() > self.config.optimizer.history_size {
                history.pop_front();
            }
        }
        OptimizationOutcome::Completed(run)
    }

    /// Read-only snapshot of every component
    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            timestamp: Utc::now(),
            cache: self.cache.get_stats(),
            memory: self.memory.get_memory_stats(),
            performance: self.monitor.get_summary(),
            background: self.background.get_queue_stats(),
            optimizer: OptimizerState {
                is_optimizing: self.is_optimizing(),
                is_running: self.is_running(),
                run_count: self.run_count.load(Ordering::Acquire),
                last_optimization: *lock(&self.last_optimization),
            },
        }
    }

    pub fn get_optimization_suggestions(&self) -> Vec<Suggestion> {
        let metrics = self.get_performance_metrics();
        build_suggestions(
            &metrics.cache,
            &metrics.memory,
            &metrics.performance,
            &metrics.background,
            self.monitor.get_optimization_suggestions(),
        )
    }

    /// Apply the remedy for each current suggestion
    ///
    /// Never fails as a whole; each suggestion gets its own result.
    pub fn apply_auto_optimizations(&self) -> Vec<AutoOptimizationResult> {
        let results: Vec<AutoOptimizationResult> = self
            .get_optimization_suggestions()
            .into_iter()
            .map(|suggestion| {
                let (action, outcome) = match catch_unwind(AssertUnwindSafe(|| {
                    self.apply_remedy(suggestion.category)
                })) {
                    Ok(result) => result,
                    Err(_) => (
                        "remedy".to_string(),
                        Err("remedy panicked".to_string()),
                    ),
                };
                AutoOptimizationResult {
                    suggestion: suggestion.title,
                    category: suggestion.category,
                    action,
                    success: outcome.is_ok(),
                    error: outcome.err(),
                }
            })
            .collect();

        let failed = results.iter().filter(|r| !r.success).count();
        info!(applied = results.len() - failed, failed, "auto optimizations applied");
        results
    }

    fn apply_remedy(
        &self,
        category: SuggestionCategory,
    ) -> (String, std::result::Result<(), String>) {
        match category {
            SuggestionCategory::Cache => {
                let report = self.cache.optimize();
                debug!(?report, "cache remedy applied");
                ("cache_optimize".to_string(), Ok(()))
            }
            SuggestionCategory::Memory => {
                let outcome = if self.memory.force_garbage_collection() {
                    Ok(())
                } else {
                    Err("no reclamation capability available".to_string())
                };
                ("force_reclamation".to_string(), outcome)
            }
            SuggestionCategory::Performance => {
                let pruned = self.monitor.prune_history(SUMMARY_WINDOW);
                let (expired, _) = self.cache.purge_expired();
                debug!(pruned, expired, "performance remedy applied");
                ("prune_history".to_string(), Ok(()))
            }
            SuggestionCategory::BackgroundTasks => {
                if self.background.is_paused() {
                    self.background.resume();
                    ("resume_processing".to_string(), Ok(()))
                } else {
                    (
                        "resume_processing".to_string(),
                        Err("queue is not paused; raise background.max_workers".to_string()),
                    )
                }
            }
        }
    }

    /// Completed runs, oldest first
    pub fn history(&self) -> Vec<OptimizationRun> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Versioned diagnostics snapshot
    pub fn export_performance_data(&self) -> PerformanceExport {
        let history = lock(&self.history);
        let skip = history.len().saturating_sub(EXPORTED_RUNS);
        let recent: Vec<OptimizationRun> = history.iter().skip(skip).cloned().collect();
        drop(history);

        PerformanceExport {
            version: EXPORT_VERSION.to_string(),
            timestamp: Utc::now(),
            metrics: self.get_performance_metrics(),
            suggestions: self.get_optimization_suggestions(),
            history: recent,
            config: self.config.clone(),
        }
    }

    /// `export_performance_data` as pretty-printed JSON
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_performance_data())?)
    }
}

impl Drop for Optimizer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimizer")
            .field("is_optimizing", &self.is_optimizing())
            .field("run_count", &self.run_count.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Run one step on the blocking pool, capturing errors and panics
async fn run_step<F>(step: OptimizationStep, body: F) -> StepResult
where
    F: FnOnce() -> Result<Value> + Send + 'static,
{
    let start = Instant::now();
    let outcome = match tokio::task::spawn_blocking(body).await {
        Ok(Ok(details)) => Ok(details),
        Ok(Err(err)) => Err(err.to_string()),
        Err(join_error) => Err(format!("step aborted: {}", join_error)),
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(details) => StepResult {
            step,
            success: true,
            duration_ms,
            details,
            error: None,
        },
        Err(error) => {
            warn!(?step, %error, "optimization step failed");
            StepResult {
                step,
                success: false,
                duration_ms,
                details: Value::Null,
                error: Some(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEvent, SetOptions};
    use crate::config::MemoryConfig;
    use crate::errors::CoreError;
    use crate::memory::MemoryProbe;
    use crate::monitor::SystemSample;
    use crate::types::Severity;

    struct FixedProbe(Arc<AtomicU64>);

    impl MemoryProbe for FixedProbe {
        fn used_bytes(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn optimizer_with_usage(used: u64) -> (Optimizer, Arc<AtomicU64>) {
        let config = Config::default();
        let usage = Arc::new(AtomicU64::new(used));
        let memory = MemoryManager::with_probe(
            MemoryConfig {
                max_heap_bytes: 1000,
                ..Default::default()
            },
            Box::new(FixedProbe(Arc::clone(&usage))),
        );
        let optimizer = Optimizer::with_components(
            config.clone(),
            Arc::new(Cache::new(config.cache.clone())),
            Arc::new(memory),
            BackgroundProcessor::new(config.background.clone()),
            Arc::new(PerformanceMonitor::new(config.monitor.clone())),
        );
        (optimizer, usage)
    }

    #[tokio::test]
    async fn test_cycle_runs_every_step() {
        let (optimizer, _) = optimizer_with_usage(100);
        optimizer
            .cache()
            .set("short", &"v", SetOptions::new().with_ttl(Duration::ZERO))
            .unwrap();

        let outcome = optimizer.perform_optimization().await;
        let run = outcome.run().expect("cycle should run");
        let steps: Vec<_> = run.steps.iter().map(|s| s.step).collect();
        assert_eq!(
            steps,
            vec![
                OptimizationStep::Cache,
                OptimizationStep::Memory,
                OptimizationStep::BackgroundTasks,
                OptimizationStep::Monitor,
            ]
        );
        assert_eq!(run.failed_steps(), 0);
        assert_eq!(run.steps[0].details["expired_removed"], 1);
        assert_eq!(run.run, 1);

        assert!(!optimizer.is_optimizing());
        assert_eq!(optimizer.history().len(), 1);
        let metrics = optimizer.get_performance_metrics();
        assert_eq!(metrics.optimizer.run_count, 1);
        assert!(metrics.optimizer.last_optimization.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_cycles_are_exclusive() {
        let (optimizer, _) = optimizer_with_usage(100);
        let (first, second) = tokio::join!(
            optimizer.perform_optimization(),
            optimizer.perform_optimization()
        );

        let completed = [&first, &second]
            .iter()
            .filter(|o| !o.is_in_progress())
            .count();
        assert_eq!(completed, 1);
        assert!(second.is_in_progress());
        assert_eq!(optimizer.history().len(), 1);
        assert!(!optimizer.is_optimizing());

        assert!(optimizer.perform_optimization().await.run().is_some());
        assert_eq!(optimizer.history().len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let (mut optimizer, _) = optimizer_with_usage(100);
        optimizer.config.optimizer.history_size = 3;
        for _ in 0..5 {
            optimizer.perform_optimization().await;
        }
        let runs: Vec<u64> = optimizer.history().iter().map(|r| r.run).collect();
        assert_eq!(runs, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_failing_step_is_recorded() {
        let result = run_step(OptimizationStep::Memory, || {
            Err(CoreError::Generic("disk on fire".into()))
        })
        .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("disk on fire"));

        let result = run_step(OptimizationStep::Cache, || -> Result<Value> {
            panic!("step exploded")
        })
        .await;
        assert!(!result.success);
        assert!(result.details.is_null());
    }

    #[tokio::test]
    async fn test_cache_hook_registered_for_reclamation() {
        let (optimizer, _) = optimizer_with_usage(100);
        let mut events = optimizer.cache().subscribe();
        optimizer
            .cache()
            .set("gone", &1u32, SetOptions::new().with_ttl(Duration::ZERO))
            .unwrap();

        assert!(optimizer.memory().force_garbage_collection());
        assert!(optimizer.cache().is_empty());

        let mut expired = false;
        while let Ok(event) = events.try_recv() {
            expired |= matches!(event, CacheEvent::Expired { .. });
        }
        assert!(expired);
    }

    #[test]
    fn test_suggestions_merge_components() {
        let (optimizer, _) = optimizer_with_usage(950);
        for i in 0..4 {
            let _: Option<u32> = optimizer.cache().get(&format!("missing{}", i)).unwrap();
        }
        optimizer.monitor().record_system_sample(SystemSample {
            cpu_percent: 100.0,
            memory_bytes: 0,
            event_loop_lag_ms: 1000.0,
        });

        let suggestions = optimizer.get_optimization_suggestions();
        let categories: Vec<_> = suggestions.iter().map(|s| s.category).collect();
        assert!(categories.contains(&SuggestionCategory::Cache));
        assert!(categories.contains(&SuggestionCategory::Memory));
        assert!(suggestions
            .iter()
            .any(|s| s.category == SuggestionCategory::Memory && s.severity == Severity::Critical));
        assert!(suggestions
            .iter()
            .any(|s| s.title == "Degraded system health"));
    }

    #[tokio::test]
    async fn test_auto_optimizations_capture_each_result() {
        let (optimizer, _) = optimizer_with_usage(950);
        let _: Option<u32> = optimizer.cache().get("cold").unwrap();
        for _ in 0..11 {
            let _ = optimizer
                .background()
                .submit_fn(crate::types::Priority::Low, || Ok(Value::Null));
        }
        optimizer.background().pause();

        let results = optimizer.apply_auto_optimizations();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        assert!(results
            .iter()
            .any(|r| r.category == SuggestionCategory::Memory && r.action == "force_reclamation"));
        assert!(!optimizer.background().is_paused());
    }

    #[tokio::test]
    async fn test_export() {
        let (optimizer, _) = optimizer_with_usage(100);
        for _ in 0..12 {
            optimizer.perform_optimization().await;
        }
        let export = optimizer.export_performance_data();
        assert_eq!(export.version, "1.0");
        assert_eq!(export.history.len(), 10);
        assert_eq!(export.history[0].run, 3);

        let json: Value = serde_json::from_str(&optimizer.export_json().unwrap()).unwrap();
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["config"]["cache"]["max_entries"], 1000);
        assert_eq!(json["metrics"]["optimizer"]["run_count"], 12);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (optimizer, _) = optimizer_with_usage(100);
        let optimizer = Arc::new(optimizer);
        optimizer.start();
        assert!(optimizer.is_running());
        assert!(optimizer.memory().is_monitoring());
        assert!(optimizer.monitor().is_monitoring());

        optimizer.stop();
        assert!(!optimizer.is_running());
        assert!(!optimizer.memory().is_monitoring());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.cache.max_entries = 0;
        assert!(Optimizer::new(config).is_err());
    }
}
