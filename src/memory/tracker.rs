//! Side table of metadata for objects handed out by pools
//!
//! The table never owns the objects themselves. Each borrowed object gets a
//! generation-checked handle; a handle from a freed slot no longer resolves
//! even after the slot is reused.

use std::time::{Duration, Instant};

/// Handle identifying one borrow of a pooled object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    index: u32,
    generation: u32,
}

/// What is known about a borrowed object
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub pool: String,
    pub acquired_at: Instant,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    meta: Option<ObjectMeta>,
}

/// Arena of object metadata indexed by `ObjectHandle`
#[derive(Debug, Default)]
pub struct ObjectTracker {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl ObjectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new borrow
    pub fn track(&mut self, meta: ObjectMeta) -> ObjectHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.meta = Some(meta);
            return ObjectHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            meta: Some(meta),
        });
        ObjectHandle {
            index,
            generation: 0,
        }
    }

    /// Forget a borrow, returning its metadata if the handle was still live
    pub fn untrack(&mut self, handle: ObjectHandle) -> Option<ObjectMeta> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let meta = slot.meta.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(meta)
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&ObjectMeta> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.meta.as_ref()
    }

    /// Drop metadata for borrows older than `max_age`
    ///
    /// Objects that were never returned would otherwise pin their slots.
    pub fn prune_older_than(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut pruned = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let stale = slot
                .meta
                .as_ref()
                .is_some_and(|m| now.saturating_duration_since(m.acquired_at) >= max_age);
            if stale {
                slot.meta = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                pruned += 1;
            }
        }
        self.live -= pruned;
        pruned
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pool: &str) -> ObjectMeta {
        ObjectMeta {
            pool: pool.to_string(),
            acquired_at: Instant::now(),
        }
    }

    #[test]
    fn test_track_and_untrack() {
        let mut tracker = ObjectTracker::new();
        let h = tracker.track(meta("buffers"));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(h).unwrap().pool, "buffers");

        let m = tracker.untrack(h).unwrap();
        assert_eq!(m.pool, "buffers");
        assert!(tracker.is_empty());
        assert!(tracker.untrack(h).is_none());
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut tracker = ObjectTracker::new();
        let old = tracker.track(meta("a"));
        tracker.untrack(old);
        let new = tracker.track(meta("b"));

        assert!(tracker.get(old).is_none());
        assert_eq!(tracker.get(new).unwrap().pool, "b");
        assert_eq!(tracker.slots.len(), 1);
    }

    #[test]
    fn test_prune_older_than() {
        let mut tracker = ObjectTracker::new();
        let h = tracker.track(meta("a"));
        assert_eq!(tracker.prune_older_than(Duration::from_secs(60)), 0);
        assert_eq!(tracker.prune_older_than(Duration::ZERO), 1);
        assert!(tracker.get(h).is_none());
        assert!(tracker.is_empty());
    }
}
