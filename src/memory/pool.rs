//! Fixed-capacity object pools

use crate::memory::tracker::ObjectHandle;
use crate::memory::types::{PoolStats, Resettable};
use std::any::Any;
use std::ops::{Deref, DerefMut};

/// Recycling store for values that are expensive to construct
///
/// Never holds more than `max_size` idle objects; anything released beyond
/// that is dropped.
#[derive(Debug)]
pub struct ObjectPool<T> {
    name: String,
    items: Vec<T>,
    max_size: usize,
    created: u64,
    reused: u64,
    returned: u64,
    discarded: u64,
}

impl<T: Resettable> ObjectPool<T> {
    pub fn new(name: impl Into<String>, max_size: usize) -> Self {
        Self {
            name: name.into(),
            items: Vec::with_capacity(max_size.min(64)),
            max_size,
            created: 0,
            reused: 0,
            returned: 0,
            discarded: 0,
        }
    }

    /// Take an idle object, or build one with `factory`
    pub fn acquire<F>(&mut self, factory: F) -> T
    where
        F: FnOnce() -> T,
    {
        match self.items.pop() {
            Some(item) => {
                self.reused += 1;
                item
            }
            None => {
                self.created += 1;
                factory()
            }
        }
    }

    /// Reset `item` and keep it if there is room
    ///
    /// Returns `false` when the pool is full and the object was dropped.
    pub fn release(&mut self, mut item: T) -> bool {
        if self.items.len() >= self.max_size {
            self.discarded += 1;
            return false;
        }
        item.reset();
        self.items.push(item);
        self.returned += 1;
        true
    }

    /// Shrink capacity, dropping surplus idle objects
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.items.truncate(max_size);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Type-erased view of a pool so pools of different types share one map
pub trait AnyPool: Send {
    fn name(&self) -> &str;
    fn available(&self) -> usize;
    fn max_size(&self) -> usize;
    /// Drop every idle object, returning how many were released
    fn drain(&mut self) -> usize;
    fn stats(&self) -> PoolStats;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Resettable + Send + 'static> AnyPool for ObjectPool<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> usize {
        self.items.len()
    }

    fn max_size(&self) -> usize {
        self.max_size
    }

    fn drain(&mut self) -> usize {
        let released = self.items.len();
        self.items.clear();
        self.items.shrink_to_fit();
        released
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.name.clone(),
            available: self.items.len(),
            max_size: self.max_size,
            created: self.created,
            reused: self.reused,
            returned: self.returned,
            discarded: self.discarded,
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An object on loan from a named pool
///
/// Hand it back with `MemoryManager::return_pooled_object`; simply dropping
/// it is fine too, the value is then freed normally.
#[derive(Debug)]
pub struct Pooled<T> {
    value: T,
    pool: String,
    handle: ObjectHandle,
}

impl<T> Pooled<T> {
    pub(crate) fn new(value: T, pool: String, handle: ObjectHandle) -> Self {
        Self {
            value,
            pool,
            handle,
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// Keep the value for good; it will not be returned to the pool
    pub fn into_inner(self) -> T {
        self.value
    }

    pub(crate) fn into_parts(self) -> (T, String, ObjectHandle) {
        (self.value, self.pool, self.handle)
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_creates_then_reuses() {
        let mut pool: ObjectPool<Vec<u8>> = ObjectPool::new("bytes", 2);
        let mut buf = pool.acquire(|| Vec::with_capacity(1024));
        buf.extend_from_slice(b"secret");
        assert!(pool.release(buf));

        let reused = pool.acquire(Vec::new);
        assert!(reused.is_empty());
        assert!(reused.capacity() >= 1024);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn test_release_beyond_capacity_discards() {
        let mut pool: ObjectPool<String> = ObjectPool::new("strings", 1);
        assert!(pool.release(String::from("a")));
        assert!(!pool.release(String::from("b")));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn test_drain_and_resize() {
        let mut pool: ObjectPool<String> = ObjectPool::new("strings", 4);
        for _ in 0..4 {
            pool.release(String::new());
        }
        pool.set_max_size(2);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.drain(), 2);
        assert!(pool.is_empty());
    }
}
