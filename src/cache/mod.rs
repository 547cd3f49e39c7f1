//! Bounded key/value cache
//!
//! TTL expiry, gzip compression, size accounting and priority-aware LRU
//! eviction.

pub mod compression;
pub mod store;
pub mod types;

pub use store::{spawn_sweeper, Cache};
pub use types::{
    CacheEntry, CacheEvent, CacheOptimizeReport, CacheStats, EvictionReason, Priority, SetOptions,
};
