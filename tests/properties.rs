//! Property tests for capacity and eviction invariants

use perfcore::cache::Cache;
use perfcore::config::{CacheConfig, MemoryConfig};
use perfcore::memory::{MemoryManager, MemoryProbe, ObjectPool, Pooled};
use perfcore::{Priority, SetOptions};
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

struct IdleProbe;

impl MemoryProbe for IdleProbe {
    fn used_bytes(&self) -> u64 {
        0
    }
}

fn priority(n: u8) -> Priority {
    match n % 4 {
        0 => Priority::Low,
        1 => Priority::Normal,
        2 => Priority::High,
        _ => Priority::Critical,
    }
}

#[quickcheck]
fn prop_pool_never_exceeds_capacity(max_size: u8, ops: Vec<bool>) -> bool {
    let max_size = (max_size % 8) as usize + 1;
    let mut pool: ObjectPool<Vec<u8>> = ObjectPool::new("bytes", max_size);
    let mut borrowed = Vec::new();

    for acquire in ops {
        if acquire {
            borrowed.push(pool.acquire(Vec::new));
        } else {
            pool.release(borrowed.pop().unwrap_or_default());
        }
        if pool.len() > max_size {
            return false;
        }
    }
    true
}

#[quickcheck]
fn prop_managed_pool_never_exceeds_capacity(max_size: u8, ops: Vec<bool>) -> bool {
    let max_size = (max_size % 8) as usize + 1;
    let manager = MemoryManager::with_probe(MemoryConfig::default(), Box::new(IdleProbe));
    if manager.create_pool::<String>("strings", max_size).is_err() {
        return false;
    }
    let mut borrowed: Vec<Pooled<String>> = Vec::new();

    for acquire in ops {
        if acquire {
            match manager.get_pooled_object("strings", String::new) {
                Ok(object) => borrowed.push(object),
                Err(_) => return false,
            }
        } else if let Some(object) = borrowed.pop() {
            manager.return_pooled_object(object);
        }
        let stats = manager.get_memory_stats();
        if stats.pools.iter().any(|p| p.available > max_size) {
            return false;
        }
    }
    true
}

#[quickcheck]
fn prop_cache_respects_bounds(max_entries: u8, writes: Vec<(u8, u8, u8)>) -> bool {
    let max_entries = (max_entries % 8) as usize + 1;
    let cache = Cache::new(CacheConfig {
        max_entries,
        max_memory_bytes: 2048,
        compression_enabled: false,
        ..Default::default()
    });

    for (key, prio, len) in writes {
        let key = format!("k{}", key % 16);
        let value = "x".repeat(len as usize);
        if cache
            .set(key.as_str(), &value, SetOptions::new().with_priority(priority(prio)))
            .is_err()
        {
            return false;
        }
        let stats = cache.get_stats();
        if stats.size > max_entries || stats.memory_usage > stats.max_memory {
            return false;
        }
        // The entry just written is never its own eviction victim
        if !cache.has(&key) {
            return false;
        }
    }
    true
}

#[quickcheck]
fn prop_first_victim_is_lowest_priority_then_oldest(priorities: Vec<u8>) -> TestResult {
    if priorities.is_empty() || priorities.len() > 16 {
        return TestResult::discard();
    }
    let cache = Cache::new(CacheConfig {
        max_entries: priorities.len(),
        ..Default::default()
    });
    for (i, p) in priorities.iter().enumerate() {
        cache
            .set(
                format!("k{}", i),
                &i,
                SetOptions::new().with_priority(priority(*p)),
            )
            .unwrap();
    }

    let lowest = priorities.iter().map(|p| priority(*p)).min().unwrap();
    let expected = priorities
        .iter()
        .position(|p| priority(*p) == lowest)
        .unwrap();

    cache
        .set("new", &0, SetOptions::new().with_priority(Priority::Low))
        .unwrap();

    let evicted: Vec<usize> = (0..priorities.len())
        .filter(|i| !cache.has(&format!("k{}", i)))
        .collect();
    TestResult::from_bool(evicted == vec![expected] && cache.has("new"))
}
