//! Bounded, compressing, TTL and priority aware cache
//!
//! Values are serialized with `serde_json` and optionally gzip-compressed.
//! Capacity is enforced by eviction, never by rejecting a `set`:
//! - expired entries go first
//! - then the lowest priority
//! - then the least recently accessed among equal priority
//!
//! Capacity is checked before the new entry is inserted, so an entry is
//! never evicted by its own insertion. All state sits behind one mutex and
//! payloads are copied out before decoding, so `optimize` can run while other
//! callers read.

use crate::cache::compression;
use crate::cache::types::{
    CacheEntry, CacheEvent, CacheOptimizeReport, CacheStats, EvictionReason, Priority, SetOptions,
};
use crate::config::CacheConfig;
use crate::errors::Result;
use crate::events::EventBus;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Memory usage share above which `optimize` also drops live entries
pub const PRESSURE_THRESHOLD: f64 = 0.8;

/// Fraction of entries dropped by `optimize` under memory pressure
pub const PRESSURE_EVICTION_FRACTION: f64 = 0.2;

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    memory_usage: usize,
    original_bytes: usize,
    access_clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheInner {
    fn next_seq(&mut self) -> u64 {
        self.access_clock += 1;
        self.access_clock
    }

    fn insert(&mut self, key: String, entry: CacheEntry) {
        self.memory_usage += entry.stored_size;
        self.original_bytes += entry.original_size;
        self.entries.insert(key, entry);
    }

    fn take(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.memory_usage = self.memory_usage.saturating_sub(entry.stored_size);
        self.original_bytes = self.original_bytes.saturating_sub(entry.original_size);
        Some(entry)
    }

    fn pick_victim(&self, now: Instant) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| e.eviction_rank(now))
            .map(|(k, _)| k.clone())
    }

    fn expired_keys(&self, now: Instant) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Key/value cache with size accounting and priority-aware LRU eviction
pub struct Cache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
    events: EventBus<CacheEvent>,
}

impl Cache {
    /// Create a cache with the given limits
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
            events: EventBus::new(),
        }
    }

    /// Create a cache with default limits
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `value` under `key`, overwriting any previous entry
    ///
    /// Returns the stored (possibly compressed) size in bytes.
    pub fn set<V>(&self, key: impl Into<String>, value: &V, options: SetOptions) -> Result<usize>
    where
        V: Serialize + ?Sized,
    {
        let key = key.into();
        let serialized = serde_json::to_vec(value)?;
        let original_size = serialized.len();
        let (payload, compressed) = if self.config.compression_enabled {
            compression::maybe_compress(serialized, self.config.compression_threshold)?
        } else {
            (serialized, false)
        };
        let stored_size = payload.len();
        let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
        let now = Instant::now();
        let mut emitted = Vec::new();

        {
            let mut inner = self.lock();
            inner.take(&key);

            while !inner.entries.is_empty()
                && (inner.entries.len() + 1 > self.config.max_entries
                    || inner.memory_usage + stored_size > self.config.max_memory_bytes)
            {
                let Some(victim) = inner.pick_victim(now) else {
                    break;
                };
                if let Some(evicted) = inner.take(&victim) {
                    if evicted.is_expired(now) {
                        inner.expirations += 1;
                        emitted.push(CacheEvent::Expired { key: victim });
                    } else {
                        inner.evictions += 1;
                        debug!(key = %victim, priority = evicted.priority.as_str(), "cache eviction");
                        emitted.push(CacheEvent::Evicted {
                            key: victim,
                            priority: evicted.priority,
                            reason: EvictionReason::Capacity,
                        });
                    }
                }
            }

            let seq = inner.next_seq();
            inner.insert(
                key.clone(),
                CacheEntry {
                    payload,
                    compressed,
                    original_size,
                    stored_size,
                    created_at: now,
                    ttl,
                    access_count: 0,
                    last_accessed: now,
                    access_seq: seq,
                    tags: options.tags.into_iter().collect::<HashSet<_>>(),
                    priority: options.priority,
                },
            );
        }

        for event in emitted {
            self.events.emit(event);
        }
        self.events.emit(CacheEvent::Set {
            key,
            stored_size,
            compressed,
        });

        Ok(stored_size)
    }

    /// Look up `key`
    ///
    /// Expired entries are removed and reported as absent. A hit bumps the
    /// access count and moves the entry to the most-recently-used position.
    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let now = Instant::now();
        let (event, found) = {
            let mut inner = self.lock();
            let state = inner.entries.get(key).map(|e| e.is_expired(now));
            match state {
                None => {
                    inner.misses += 1;
                    (CacheEvent::Miss { key: key.to_string() }, None)
                }
                Some(true) => {
                    inner.take(key);
                    inner.misses += 1;
                    inner.expirations += 1;
                    (CacheEvent::Expired { key: key.to_string() }, None)
                }
                Some(false) => {
                    let seq = inner.next_seq();
                    inner.hits += 1;
                    match inner.entries.get_mut(key) {
                        Some(entry) => {
                            entry.access_count += 1;
                            entry.last_accessed = now;
                            entry.access_seq = seq;
                            (
                                CacheEvent::Hit {
                                    key: key.to_string(),
                                    access_count: entry.access_count,
                                },
                                Some((entry.payload.clone(), entry.compressed, entry.original_size)),
                            )
                        }
                        None => (CacheEvent::Miss { key: key.to_string() }, None),
                    }
                }
            }
        };
        self.events.emit(event);

        let Some((payload, compressed, original_size)) = found else {
            return Ok(None);
        };
        let bytes = if compressed {
            compression::decompress(&payload, original_size)?
        } else {
            payload
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Whether a live entry exists, without touching access statistics
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Remove `key`, returning whether it was present
    pub fn remove(&self, key: &str) -> bool {
        self.lock().take(key).is_some()
    }

    /// Remove everything, or only entries carrying one of `tags`
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self, tags: Option<&[String]>) -> usize {
        let removed = {
            let mut inner = self.lock();
            match tags {
                None => {
                    let removed = inner.entries.len();
                    inner.entries.clear();
                    inner.memory_usage = 0;
                    inner.original_bytes = 0;
                    removed
                }
                Some(tags) => {
                    let keys: Vec<String> = inner
                        .entries
                        .iter()
                        .filter(|(_, e)| e.has_any_tag(tags))
                        .map(|(k, _)| k.clone())
                        .collect();
                    for key in &keys {
                        inner.take(key);
                    }
                    keys.len()
                }
            }
        };
        self.events.emit(CacheEvent::Cleared { removed });
        removed
    }

    /// Drop every expired entry, returning (entries, bytes) removed
    pub fn purge_expired(&self) -> (usize, usize) {
        let now = Instant::now();
        let mut bytes = 0;
        let keys = {
            let mut inner = self.lock();
            let keys = inner.expired_keys(now);
            for key in &keys {
                if let Some(entry) = inner.take(key) {
                    bytes += entry.stored_size;
                }
            }
            inner.expirations += keys.len() as u64;
            keys
        };
        let count = keys.len();
        for key in keys {
            self.events.emit(CacheEvent::Expired { key });
        }
        (count, bytes)
    }

    /// Maintenance pass
    ///
    /// Removes expired entries; when memory usage is still above 80% of the
    /// budget, also drops the lowest-priority fifth of the entries, stalest
    /// first.
    pub fn optimize(&self) -> CacheOptimizeReport {
        let start = Instant::now();
        let (expired_removed, mut bytes_freed) = self.purge_expired();
        let mut evicted = Vec::new();

        {
            let mut inner = self.lock();
            let limit = self.config.max_memory_bytes as f64 * PRESSURE_THRESHOLD;
            if inner.memory_usage as f64 > limit {
                let count = (inner.entries.len() as f64 * PRESSURE_EVICTION_FRACTION).ceil() as usize;
                let mut ranked: Vec<(String, (Priority, u64))> = inner
                    .entries
                    .iter()
                    .map(|(k, e)| (k.clone(), (e.priority, e.access_seq)))
                    .collect();
                ranked.sort_by_key(|(_, rank)| *rank);
                for (key, _) in ranked.into_iter().take(count) {
                    if let Some(entry) = inner.take(&key) {
                        bytes_freed += entry.stored_size;
                        inner.evictions += 1;
                        evicted.push(CacheEvent::Evicted {
                            key,
                            priority: entry.priority,
                            reason: EvictionReason::MemoryPressure,
                        });
                    }
                }
            }
        }

        let report = CacheOptimizeReport {
            expired_removed,
            pressure_evicted: evicted.len(),
            bytes_freed,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        for event in evicted {
            self.events.emit(event);
        }
        info!(
            expired = report.expired_removed,
            evicted = report.pressure_evicted,
            bytes = report.bytes_freed,
            "cache optimized"
        );
        report
    }

    /// Current statistics
    pub fn get_stats(&self) -> CacheStats {
        let inner = self.lock();
        let size = inner.entries.len();
        let lookups = inner.hits + inner.misses;
        let total_access: u64 = inner.entries.values().map(|e| e.access_count).sum();

        CacheStats {
            size,
            max_entries: self.config.max_entries,
            memory_usage: inner.memory_usage,
            max_memory: self.config.max_memory_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            average_access_count: if size == 0 {
                0.0
            } else {
                total_access as f64 / size as f64
            },
            compression_ratio: if inner.memory_usage == 0 {
                1.0
            } else {
                inner.original_bytes as f64 / inner.memory_usage as f64
            },
            memory_efficiency: (1.0
                - inner.memory_usage as f64 / self.config.max_memory_bytes.max(1) as f64)
                .max(0.0)
                * 100.0,
        }
    }

    /// Keys currently stored, expired ones included until purged
    pub fn keys(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Run `purge_expired` every `interval` until the cache is dropped
pub fn spawn_sweeper(cache: &Arc<Cache>, interval: Duration) -> JoinHandle<()> {
    let weak: Weak<Cache> = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(cache) = weak.upgrade() else {
                break;
            };
            let (count, bytes) = cache.purge_expired();
            if count > 0 {
                debug!(count, bytes, "swept expired cache entries");
            }
        }
    })
}
