//! Memory manager
//!
//! Owns the named object pools, tracks borrowed objects through a side
//! table, runs TTL cleanup for managed objects and watches memory usage
//! against the warning and critical thresholds.

use crate::config::MemoryConfig;
use crate::errors::{CoreError, Result};
use crate::events::EventBus;
use crate::memory::pool::{AnyPool, ObjectPool, Pooled};
use crate::memory::tracker::{ObjectMeta, ObjectTracker};
use crate::memory::types::{
    ManagedOptions, MemoryEvent, MemoryOptimizeReport, MemoryProbe, MemoryStats,
    ProcessMemoryProbe, Resettable, WarningLevel,
};
use std::collections::HashMap;
use std::ops::Deref;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reclamation callback, returns an estimate of bytes released
pub type ReclaimHook = Arc<dyn Fn() -> usize + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ManagedCounters {
    count: AtomicUsize,
    bytes: AtomicUsize,
}

#[derive(Debug)]
struct GcState {
    count: u64,
    total_freed: u64,
    last_run: Instant,
}

type Cleanup<T> = Box<dyn FnOnce(&T) + Send>;

struct ManagedState<T> {
    value: T,
    cleanup: Mutex<Option<Cleanup<T>>>,
    kind: String,
    estimated_size: usize,
    counters: Arc<ManagedCounters>,
}

impl<T> ManagedState<T> {
    fn run_cleanup(&self) -> bool {
        let Some(cleanup) = lock(&self.cleanup).take() else {
            return false;
        };
        cleanup(&self.value);
        self.counters.count.fetch_sub(1, Ordering::Relaxed);
        self.counters
            .bytes
            .fetch_sub(self.estimated_size, Ordering::Relaxed);
        true
    }
}

/// A value whose cleanup callback runs exactly once
///
/// The cleanup fires on whichever comes first: `dispose`, the TTL elapsing,
/// or the object being dropped.
pub struct ManagedObject<T> {
    state: Arc<ManagedState<T>>,
}

impl<T> ManagedObject<T> {
    /// Run the cleanup now; `false` if it already ran
    pub fn dispose(&self) -> bool {
        self.state.run_cleanup()
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.state.cleanup).is_none()
    }

    pub fn kind(&self) -> &str {
        &self.state.kind
    }
}

impl<T> Drop for ManagedObject<T> {
    fn drop(&mut self) {
        self.state.run_cleanup();
    }
}

impl<T> Deref for ManagedObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state.value
    }
}

/// Pool owner and memory watchdog
pub struct MemoryManager {
    config: MemoryConfig,
    pools: Mutex<HashMap<String, Box<dyn AnyPool>>>,
    tracker: Mutex<ObjectTracker>,
    managed: Arc<ManagedCounters>,
    probe: Box<dyn MemoryProbe>,
    reclaim_hooks: Mutex<Vec<(String, ReclaimHook)>>,
    gc: Mutex<GcState>,
    events: Arc<EventBus<MemoryEvent>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryManager {
    /// Create a manager reading process memory through `sysinfo`
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_probe(config, Box::new(ProcessMemoryProbe::new()))
    }

    /// Create a manager with a custom usage source
    pub fn with_probe(config: MemoryConfig, probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
            tracker: Mutex::new(ObjectTracker::new()),
            managed: Arc::new(ManagedCounters::default()),
            probe,
            reclaim_hooks: Mutex::new(Vec::new()),
            gc: Mutex::new(GcState {
                count: 0,
                total_freed: 0,
                last_run: Instant::now(),
            }),
            events: Arc::new(EventBus::new()),
            monitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Subscribe to memory events
    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<MemoryEvent> {
        self.events.subscribe()
    }

    /// Register a pool with an explicit capacity
    ///
    /// Re-registering a pool of the same type only changes its capacity.
    pub fn create_pool<T>(&self, name: &str, max_size: usize) -> Result<()>
    where
        T: Resettable + Send + 'static,
    {
        let mut pools = lock(&self.pools);
        match pools.get_mut(name) {
            Some(existing) => {
                let pool = existing
                    .as_any_mut()
                    .downcast_mut::<ObjectPool<T>>()
                    .ok_or_else(|| CoreError::PoolTypeMismatch {
                        pool: name.to_string(),
                    })?;
                pool.set_max_size(max_size);
            }
            None => {
                pools.insert(name.to_string(), Box::new(ObjectPool::<T>::new(name, max_size)));
            }
        }
        Ok(())
    }

    /// Borrow an object from `pool`, building one with `factory` when empty
    ///
    /// Unknown pools are created with the configured default capacity.
    pub fn get_pooled_object<T, F>(&self, pool: &str, factory: F) -> Result<Pooled<T>>
    where
        T: Resettable + Send + 'static,
        F: FnOnce() -> T,
    {
        let value = {
            let mut pools = lock(&self.pools);
            let entry = pools.entry(pool.to_string()).or_insert_with(|| -> Box<dyn AnyPool> {
                Box::new(ObjectPool::<T>::new(pool, self.config.default_pool_size))
            });
            let typed = entry
                .as_any_mut()
                .downcast_mut::<ObjectPool<T>>()
                .ok_or_else(|| CoreError::PoolTypeMismatch {
                    pool: pool.to_string(),
                })?;
            typed.acquire(factory)
        };

        let handle = lock(&self.tracker).track(ObjectMeta {
            pool: pool.to_string(),
            acquired_at: Instant::now(),
        });
        Ok(Pooled::new(value, pool.to_string(), handle))
    }

    /// Reset and return a borrowed object
    ///
    /// Returns `false` when the object was dropped instead, because the pool
    /// is full or no longer exists.
    pub fn return_pooled_object<T>(&self, object: Pooled<T>) -> bool
    where
        T: Resettable + Send + 'static,
    {
        let (value, pool, handle) = object.into_parts();
        lock(&self.tracker).untrack(handle);

        let mut pools = lock(&self.pools);
        match pools
            .get_mut(&pool)
            .and_then(|p| p.as_any_mut().downcast_mut::<ObjectPool<T>>())
        {
            Some(typed) => typed.release(value),
            None => false,
        }
    }

    /// Build a value whose `cleanup` runs exactly once
    ///
    /// With a TTL the cleanup fires automatically after it elapses unless
    /// `dispose` ran first. Automatic cleanup needs a tokio runtime.
    pub fn create_managed_object<T, F, C>(
        &self,
        factory: F,
        cleanup: C,
        options: ManagedOptions,
    ) -> ManagedObject<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
        C: FnOnce(&T) + Send + 'static,
    {
        let state = Arc::new(ManagedState {
            value: factory(),
            cleanup: Mutex::new(Some(Box::new(cleanup) as Cleanup<T>)),
            kind: options.kind,
            estimated_size: options.estimated_size,
            counters: self.managed.clone(),
        });
        self.managed.count.fetch_add(1, Ordering::Relaxed);
        self.managed
            .bytes
            .fetch_add(options.estimated_size, Ordering::Relaxed);

        if let Some(ttl) = options.ttl {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let timer_state = Arc::downgrade(&state);
                    let events = self.events.clone();
                    runtime.spawn(async move {
                        tokio::time::sleep(ttl).await;
                        let Some(state) = timer_state.upgrade() else {
                            return;
                        };
                        if state.run_cleanup() {
                            events.emit(MemoryEvent::ManagedObjectCleaned {
                                kind: state.kind.clone(),
                            });
                        }
                    });
                }
                Err(_) => {
                    warn!(kind = %state.kind, "no async runtime, managed object TTL ignored");
                }
            }
        }

        ManagedObject { state }
    }

    /// Register a reclamation callback run by `force_garbage_collection`
    pub fn register_reclaim_hook<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        lock(&self.reclaim_hooks).push((name.into(), Arc::new(hook)));
    }

    /// Run every registered reclamation hook
    ///
    /// Returns `false` without doing anything when nothing is registered. A
    /// panicking hook is logged and skipped.
    pub fn force_garbage_collection(&self) -> bool {
        let hooks: Vec<(String, ReclaimHook)> = lock(&self.reclaim_hooks).clone();
        if hooks.is_empty() {
            debug!("no reclamation hooks registered");
            return false;
        }

        let before = self.probe.used_bytes();
        let mut reported = 0usize;
        let mut succeeded = 0usize;
        for (name, hook) in &hooks {
            match catch_unwind(AssertUnwindSafe(|| hook())) {
                Ok(bytes) => {
                    reported += bytes;
                    succeeded += 1;
                }
                Err(_) => warn!(hook = %name, "reclamation hook panicked"),
            }
        }
        if succeeded == 0 {
            return false;
        }
        let after = self.probe.used_bytes();
        let freed = before.saturating_sub(after).max(reported as u64);

        {
            let mut gc = lock(&self.gc);
            gc.count += 1;
            gc.total_freed += freed;
            gc.last_run = Instant::now();
        }
        debug!(freed, hooks = succeeded, "reclamation finished");
        self.events.emit(MemoryEvent::GarbageCollected {
            freed_bytes: freed,
            hooks: succeeded,
        });
        true
    }

    /// Release every pooled object, prune stale handles, then reclaim
    pub fn optimize_memory(&self) -> MemoryOptimizeReport {
        let start = Instant::now();
        let before = self.probe.used_bytes();

        let pooled_objects_released: usize = lock(&self.pools)
            .values_mut()
            .map(|pool| pool.drain())
            .sum();
        let stale_handles_pruned = lock(&self.tracker)
            .prune_older_than(Duration::from_millis(self.config.stale_object_age_ms));
        let gc_performed = self.force_garbage_collection();

        let after = self.probe.used_bytes();
        let report = MemoryOptimizeReport {
            duration_ms: start.elapsed().as_millis() as u64,
            bytes_freed: before.saturating_sub(after),
            pooled_objects_released,
            stale_handles_pruned,
            gc_performed,
            optimizations_performed: [
                pooled_objects_released > 0,
                stale_handles_pruned > 0,
                gc_performed,
            ]
            .iter()
            .filter(|done| **done)
            .count(),
        };
        info!(
            released = report.pooled_objects_released,
            pruned = report.stale_handles_pruned,
            gc = report.gc_performed,
            "memory optimized"
        );
        self.events.emit(MemoryEvent::Optimized(report.clone()));
        report
    }

    /// One monitoring tick
    ///
    /// Above the critical threshold this emits a critical warning and then
    /// runs `optimize_memory` before returning. Independently, reclamation
    /// is forced once the GC interval has passed.
    pub fn check_memory(&self) -> Option<WarningLevel> {
        let used = self.probe.used_bytes();
        let max = self.config.max_heap_bytes.max(1);
        let ratio = used as f64 / max as f64;

        let level = if ratio > self.config.critical_threshold {
            Some(WarningLevel::Critical)
        } else if ratio > self.config.warning_threshold {
            Some(WarningLevel::Warning)
        } else {
            None
        };

        if let Some(level) = level {
            warn!(used, max, ratio, ?level, "memory threshold exceeded");
            self.events.emit(MemoryEvent::MemoryWarning {
                level,
                used_bytes: used,
                max_bytes: max,
                usage_ratio: ratio,
            });
            if level == WarningLevel::Critical {
                self.optimize_memory();
            }
        }

        let overdue = lock(&self.gc).last_run.elapsed() > self.config.gc_interval();
        if overdue {
            self.force_garbage_collection();
        }
        level
    }

    /// Start periodic `check_memory` calls on the tokio runtime
    ///
    /// The task holds only a weak reference and ends when the manager drops.
    pub fn start_monitoring(self: &Arc<Self>) {
        let mut monitor = lock(&self.monitor);
        if monitor.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(self);
        let period = self.config.check_interval();
        *monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.check_memory();
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "memory monitoring started");
    }

    pub fn stop_monitoring(&self) {
        if let Some(handle) = lock(&self.monitor).take() {
            handle.abort();
            debug!("memory monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.monitor)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Current memory usage as a share of `max_heap_bytes`
    pub fn usage_ratio(&self) -> f64 {
        self.probe.used_bytes() as f64 / self.config.max_heap_bytes.max(1) as f64
    }

    /// Current statistics
    pub fn get_memory_stats(&self) -> MemoryStats {
        let used = self.probe.used_bytes();
        let mut pools: Vec<_> = lock(&self.pools).values().map(|p| p.stats()).collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        let gc = lock(&self.gc);

        MemoryStats {
            used_bytes: used,
            max_heap_bytes: self.config.max_heap_bytes,
            usage_ratio: used as f64 / self.config.max_heap_bytes.max(1) as f64,
            pools,
            tracked_objects: lock(&self.tracker).len(),
            managed_objects: self.managed.count.load(Ordering::Relaxed),
            managed_bytes: self.managed.bytes.load(Ordering::Relaxed),
            gc_count: gc.count,
            total_freed_bytes: gc.total_freed,
            ms_since_last_gc: gc.last_run.elapsed().as_millis() as u64,
            is_monitoring: self.is_monitoring(),
        }
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct FixedProbe(Arc<AtomicU64>);

    impl MemoryProbe for FixedProbe {
        fn used_bytes(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn manager_at(used: u64) -> (MemoryManager, Arc<AtomicU64>) {
        let level = Arc::new(AtomicU64::new(used));
        let config = MemoryConfig {
            max_heap_bytes: 1000,
            default_pool_size: 2,
            ..MemoryConfig::default()
        };
        (
            MemoryManager::with_probe(config, Box::new(FixedProbe(level.clone()))),
            level,
        )
    }

    #[test]
    fn test_pool_recycles_and_clears() {
        let (manager, _) = manager_at(0);
        let mut buf = manager
            .get_pooled_object("buffers", || Vec::<u8>::with_capacity(64))
            .unwrap();
        buf.extend_from_slice(b"previous owner");
        assert!(manager.return_pooled_object(buf));

        let again = manager.get_pooled_object("buffers", Vec::<u8>::new).unwrap();
        assert!(again.is_empty());
        assert!(again.capacity() >= 64);

        let stats = manager.get_memory_stats();
        assert_eq!(stats.pools[0].reused, 1);
        assert_eq!(stats.tracked_objects, 1);
    }

    #[test]
    fn test_pool_capacity_respected() {
        let (manager, _) = manager_at(0);
        let objects: Vec<_> = (0..5)
            .map(|_| manager.get_pooled_object("s", String::new).unwrap())
            .collect();
        let kept = objects
            .into_iter()
            .map(|o| manager.return_pooled_object(o))
            .filter(|pooled| *pooled)
            .count();

        assert_eq!(kept, 2);
        assert_eq!(manager.get_memory_stats().pools[0].available, 2);
        assert_eq!(manager.get_memory_stats().tracked_objects, 0);
    }

    #[test]
    fn test_pool_type_mismatch() {
        let (manager, _) = manager_at(0);
        manager.create_pool::<String>("shared", 4).unwrap();
        let err = manager.get_pooled_object("shared", Vec::<u8>::new).unwrap_err();
        assert!(matches!(err, CoreError::PoolTypeMismatch { .. }));
    }

    #[test]
    fn test_managed_object_dispose_once() {
        let (manager, _) = manager_at(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let object = manager.create_managed_object(
            || vec![1u8; 16],
            move |v: &Vec<u8>| {
                assert_eq!(v.len(), 16);
                counter.fetch_add(1, Ordering::SeqCst);
            },
            ManagedOptions {
                estimated_size: 16,
                ..ManagedOptions::default()
            },
        );
        assert_eq!(object.len(), 16);
        assert_eq!(manager.get_memory_stats().managed_bytes, 16);

        assert!(object.dispose());
        assert!(!object.dispose());
        assert!(object.is_disposed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get_memory_stats().managed_objects, 0);
    }

    #[test]
    fn test_managed_object_cleanup_on_drop() {
        let (manager, _) = manager_at(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let object = manager.create_managed_object(
            || vec![0u8; 64],
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            ManagedOptions {
                estimated_size: 64,
                ..ManagedOptions::default()
            },
        );
        assert_eq!(manager.get_memory_stats().managed_bytes, 64);

        drop(object);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = manager.get_memory_stats();
        assert_eq!(stats.managed_objects, 0);
        assert_eq!(stats.managed_bytes, 0);
    }

    #[test]
    fn test_dispose_then_drop_cleans_once() {
        let (manager, _) = manager_at(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let object = manager.create_managed_object(
            || 1u8,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            ManagedOptions::default(),
        );
        assert!(object.dispose());
        drop(object);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ttl_timer_does_not_keep_value_alive() {
        let (manager, _) = manager_at(0);
        let value = Arc::new(());
        let object = manager.create_managed_object(
            || Arc::clone(&value),
            |_| {},
            ManagedOptions {
                ttl: Some(Duration::from_secs(60)),
                ..ManagedOptions::default()
            },
        );
        assert_eq!(Arc::strong_count(&value), 2);

        object.dispose();
        drop(object);
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[tokio::test]
    async fn test_managed_object_ttl_cleanup() {
        let (manager, _) = manager_at(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let object = manager.create_managed_object(
            || 7u32,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            ManagedOptions {
                ttl: Some(Duration::from_millis(10)),
                kind: "session".to_string(),
                estimated_size: 4,
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(object.is_disposed());
        assert!(!object.dispose());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gc_without_hooks_is_noop() {
        let (manager, _) = manager_at(0);
        assert!(!manager.force_garbage_collection());
        assert_eq!(manager.get_memory_stats().gc_count, 0);
    }

    #[test]
    fn test_gc_records_freed_bytes() {
        let (manager, level) = manager_at(900);
        let probe_level = level.clone();
        manager.register_reclaim_hook("shrink", move || {
            probe_level.store(400, Ordering::Relaxed);
            10
        });
        assert!(manager.force_garbage_collection());

        let stats = manager.get_memory_stats();
        assert_eq!(stats.gc_count, 1);
        assert_eq!(stats.total_freed_bytes, 500);
    }

    #[test]
    fn test_panicking_hook_is_contained() {
        let (manager, _) = manager_at(0);
        manager.register_reclaim_hook("bad", || panic!("boom"));
        assert!(!manager.force_garbage_collection());
    }

    #[test]
    fn test_optimize_memory_drains_pools() {
        let (manager, _) = manager_at(0);
        let obj = manager.get_pooled_object("s", String::new).unwrap();
        manager.return_pooled_object(obj);
        manager.register_reclaim_hook("noop", || 0);

        let report = manager.optimize_memory();
        assert_eq!(report.pooled_objects_released, 1);
        assert!(report.gc_performed);
        assert_eq!(report.optimizations_performed, 2);
        assert_eq!(manager.get_memory_stats().pools[0].available, 0);
    }

    #[test]
    fn test_warning_level() {
        let (manager, _) = manager_at(850);
        let mut events = manager.subscribe();
        assert_eq!(manager.check_memory(), Some(WarningLevel::Warning));
        match events.try_recv().unwrap() {
            MemoryEvent::MemoryWarning { level, .. } => assert_eq!(level, WarningLevel::Warning),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_critical_level_triggers_optimization() {
        let (manager, _) = manager_at(950);
        let mut events = manager.subscribe();
        assert_eq!(manager.check_memory(), Some(WarningLevel::Critical));

        match events.try_recv().unwrap() {
            MemoryEvent::MemoryWarning { level, .. } => assert_eq!(level, WarningLevel::Critical),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events.try_recv().unwrap(),
            MemoryEvent::Optimized(_)
        ));
    }

    #[test]
    fn test_below_thresholds() {
        let (manager, _) = manager_at(100);
        assert_eq!(manager.check_memory(), None);
    }

    #[test]
    fn test_gc_interval_forces_reclamation() {
        let level = Arc::new(AtomicU64::new(0));
        let manager = MemoryManager::with_probe(
            MemoryConfig {
                gc_interval_ms: 0,
                ..MemoryConfig::default()
            },
            Box::new(FixedProbe(level)),
        );
        manager.register_reclaim_hook("noop", || 0);
        std::thread::sleep(Duration::from_millis(2));
        manager.check_memory();
        assert_eq!(manager.get_memory_stats().gc_count, 1);
    }

    #[test]
    fn test_concurrent_borrow_and_return() {
        use std::sync::atomic::AtomicBool;

        let (manager, _) = manager_at(0);
        manager.create_pool::<Vec<u8>>("shared", 4).unwrap();
        manager.register_reclaim_hook("noop", || 0);
        let borrowers_done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let borrowers: Vec<_> = (0..6)
                .map(|_| {
                    let manager = &manager;
                    scope.spawn(move || {
                        for i in 0..300 {
                            let mut held: Vec<Pooled<Vec<u8>>> = (0..1 + i % 3)
                                .map(|_| manager.get_pooled_object("shared", Vec::new).unwrap())
                                .collect();
                            for buf in held.iter_mut() {
                                assert!(buf.is_empty());
                                buf.push(i as u8);
                            }
                            for buf in held {
                                manager.return_pooled_object(buf);
                            }
                        }
                    })
                })
                .collect();

            let manager = &manager;
            let borrowers_done = &borrowers_done;
            scope.spawn(move || {
                while !borrowers_done.load(Ordering::SeqCst) {
                    manager.optimize_memory();
                    let stats = manager.get_memory_stats();
                    assert!(stats.pools.iter().all(|p| p.available <= p.max_size));
                }
            });

            for borrower in borrowers {
                borrower.join().unwrap();
            }
            borrowers_done.store(true, Ordering::SeqCst);
        });

        let stats = manager.get_memory_stats();
        let pool = &stats.pools[0];
        assert!(pool.available <= 4);
        assert_eq!(stats.tracked_objects, 0);
        // 6 threads x 100 rounds each of 1, 2 and 3 borrows
        assert_eq!(pool.created + pool.reused, 3600);
        assert_eq!(pool.returned + pool.discarded, 3600);
    }

    #[tokio::test]
    async fn test_start_stop_monitoring() {
        let (manager, _) = manager_at(0);
        let manager = Arc::new(manager);
        manager.start_monitoring();
        assert!(manager.is_monitoring());
        manager.stop_monitoring();
        assert!(!manager.is_monitoring());
    }
}
