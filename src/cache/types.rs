//! Cache data types

pub use crate::types::Priority;
use serde::Serialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Per-entry options for `Cache::set`
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time to live, `None` uses the configured default
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub priority: Priority,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Stored entry, owned exclusively by the cache
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub(crate) payload: Vec<u8>,
    pub(crate) compressed: bool,
    pub original_size: usize,
    pub stored_size: usize,
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_accessed: Instant,
    /// Monotonic access stamp, breaks ties between equal `last_accessed`
    pub(crate) access_seq: u64,
    pub tags: HashSet<String>,
    pub priority: Priority,
}

impl CacheEntry {
    /// Visible only while `now - created_at < ttl`
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }

    /// Eviction order key: expired first, then priority, then staleness
    pub(crate) fn eviction_rank(&self, now: Instant) -> (bool, Priority, u64) {
        (!self.is_expired(now), self.priority, self.access_seq)
    }
}

/// Why an entry left the cache without being removed explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Made room for a new entry
    Capacity,
    /// Dropped by `optimize` under memory pressure
    MemoryPressure,
}

/// Events emitted by the cache
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    Set {
        key: String,
        stored_size: usize,
        compressed: bool,
    },
    Hit {
        key: String,
        access_count: u64,
    },
    Miss {
        key: String,
    },
    Expired {
        key: String,
    },
    Evicted {
        key: String,
        priority: Priority,
        reason: EvictionReason,
    },
    Cleared {
        removed: usize,
    },
}

/// Snapshot returned by `Cache::get_stats`
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_entries: usize,
    pub memory_usage: usize,
    pub max_memory: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// hits / (hits + misses), 0.0 before any lookup
    pub hit_rate: f64,
    pub average_access_count: f64,
    /// original bytes / stored bytes, 1.0 when nothing is compressed
    pub compression_ratio: f64,
    /// Share of the memory budget still free, in percent
    pub memory_efficiency: f64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn memory_utilization(&self) -> f64 {
        if self.max_memory == 0 {
            return 0.0;
        }
        self.memory_usage as f64 / self.max_memory as f64
    }
}

/// Result of `Cache::optimize`
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheOptimizeReport {
    pub expired_removed: usize,
    pub pressure_evicted: usize,
    pub bytes_freed: usize,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(priority: Priority, ttl: Duration, seq: u64) -> CacheEntry {
        let now = Instant::now();
        CacheEntry {
            payload: vec![1, 2, 3],
            compressed: false,
            original_size: 3,
            stored_size: 3,
            created_at: now,
            ttl,
            access_count: 0,
            last_accessed: now,
            access_seq: seq,
            tags: HashSet::new(),
            priority,
        }
    }

    #[test]
    fn test_zero_ttl_is_expired() {
        let e = entry(Priority::Normal, Duration::ZERO, 0);
        assert!(e.is_expired(Instant::now()));
    }

    #[test]
    fn test_eviction_rank() {
        let now = Instant::now();
        let low_new = entry(Priority::Low, Duration::from_secs(60), 10);
        let high_old = entry(Priority::High, Duration::from_secs(60), 1);
        let expired = entry(Priority::Critical, Duration::ZERO, 20);

        assert!(expired.eviction_rank(now) < low_new.eviction_rank(now));
        assert!(low_new.eviction_rank(now) < high_old.eviction_rank(now));
    }

    #[test]
    fn test_set_options_builder() {
        let opts = SetOptions::new()
            .with_ttl(Duration::from_millis(50))
            .with_tag("users")
            .with_priority(Priority::High);
        assert_eq!(opts.ttl, Some(Duration::from_millis(50)));
        assert_eq!(opts.tags, vec!["users".to_string()]);
        assert_eq!(opts.priority, Priority::High);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(CacheEvent::Miss {
            key: "k".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "miss");
    }
}
