//! Memory manager data types

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{Pid, System};

/// Values that can be wiped before going back into a pool
///
/// Clearing on release keeps a previous borrower's data from leaking to the
/// next one.
pub trait Resettable {
    fn reset(&mut self);
}

impl<T> Resettable for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T> Resettable for VecDeque<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl Resettable for String {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<K, V, S> Resettable for HashMap<K, V, S> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Source of the current memory usage figure
pub trait MemoryProbe: Send + Sync {
    /// Bytes currently in use
    fn used_bytes(&self) -> u64;
}

/// Resident memory of the current process, read through `sysinfo`
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn used_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !system.refresh_process(pid) {
            return 0;
        }
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

/// Severity of a memory warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Warning,
    Critical,
}

/// Events emitted by the memory manager
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MemoryEvent {
    MemoryWarning {
        level: WarningLevel,
        used_bytes: u64,
        max_bytes: u64,
        usage_ratio: f64,
    },
    GarbageCollected {
        freed_bytes: u64,
        hooks: usize,
    },
    Optimized(MemoryOptimizeReport),
    ManagedObjectCleaned {
        kind: String,
    },
}

/// Options for `MemoryManager::create_managed_object`
#[derive(Debug, Clone)]
pub struct ManagedOptions {
    /// Run cleanup automatically once this much time has passed
    pub ttl: Option<Duration>,
    pub kind: String,
    pub estimated_size: usize,
}

impl Default for ManagedOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            kind: "generic".to_string(),
            estimated_size: 0,
        }
    }
}

/// Result of `MemoryManager::optimize_memory`
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryOptimizeReport {
    pub duration_ms: u64,
    pub bytes_freed: u64,
    pub pooled_objects_released: usize,
    pub stale_handles_pruned: usize,
    pub gc_performed: bool,
    /// Number of sub-steps that actually did something
    pub optimizations_performed: usize,
}

/// Per-pool counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub available: usize,
    pub max_size: usize,
    pub created: u64,
    pub reused: u64,
    pub returned: u64,
    pub discarded: u64,
}

/// Snapshot returned by `MemoryManager::get_memory_stats`
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub used_bytes: u64,
    pub max_heap_bytes: u64,
    pub usage_ratio: f64,
    pub pools: Vec<PoolStats>,
    pub tracked_objects: usize,
    pub managed_objects: usize,
    pub managed_bytes: usize,
    pub gc_count: u64,
    pub total_freed_bytes: u64,
    pub ms_since_last_gc: u64,
    pub is_monitoring: bool,
}
