//! Per-component event bus
//!
//! Publisher-subscriber pattern with bounded channels. Every component owns
//! its own bus, so subscribers are dropped together with the component and
//! there is no global listener registry.

use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// Channel capacity per subscriber (prevents unbounded memory growth)
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Event bus owned by a single component
pub struct EventBus<E> {
    subscribers: Mutex<Vec<mpsc::Sender<E>>>,
}

impl<E: Clone> EventBus<E> {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber
    ///
    /// Delivery is best effort: when a subscriber falls more than
    /// `EVENT_CHANNEL_CAPACITY` events behind, newer events are dropped for it.
    pub fn subscribe(&self) -> mpsc::Receiver<E> {
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Emit an event to all live subscribers
    ///
    /// Never blocks. Subscribers whose receiver was dropped are removed.
    pub fn emit(&self, event: E) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| !s.is_closed())
            .count()
    }

    /// Drop every subscriber
    pub fn clear(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("EventBus").field("subscribers", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        One,
        Two(u32),
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus: EventBus<Ping> = EventBus::new();
        bus.emit(Ping::One);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_fan_out() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(Ping::Two(7));

        assert_eq!(a.try_recv().unwrap(), Ping::Two(7));
        assert_eq!(b.try_recv().unwrap(), Ping::Two(7));
    }

    #[test]
    fn test_closed_subscriber_pruned() {
        let bus = EventBus::new();
        let receiver = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(receiver);

        bus.emit(Ping::One);

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), Ping::One);
    }

    #[test]
    fn test_bounded_channel_behavior() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        for i in 0..150 {
            bus.emit(Ping::Two(i));
        }

        let mut received = 0;
        while receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, EVENT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_clear() {
        let bus: EventBus<Ping> = EventBus::new();
        let _r = bus.subscribe();
        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
