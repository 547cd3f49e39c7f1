//! Memory management
//!
//! Named object pools with defensive clearing, a generation-checked side
//! table for borrowed objects, exactly-once managed cleanup and
//! threshold-triggered reclamation.

pub mod manager;
pub mod pool;
pub mod tracker;
pub mod types;

pub use manager::{ManagedObject, MemoryManager, ReclaimHook};
pub use pool::{AnyPool, ObjectPool, Pooled};
pub use tracker::{ObjectHandle, ObjectMeta, ObjectTracker};
pub use types::{
    ManagedOptions, MemoryEvent, MemoryOptimizeReport, MemoryProbe, MemoryStats, PoolStats,
    ProcessMemoryProbe, Resettable, WarningLevel,
};
