//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from multiple sources (pool, gates, queue,
//! supervisor, worker runners).
//!
//! ## Architecture
//! ```text
//! Publishers (many):                    Consumers:
//!   ConnectionPool ──┐
//!   Gate (x2)      ──┼────► Bus ───────► SubscriberSet listener (fan-out)
//!   TaskQueue      ──┤  (broadcast)
//!   Supervisor     ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks; it calls
//!   `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent events for all
//!   receivers; slow receivers observe `RecvError::Lagged(n)` and skip the
//!   `n` oldest items.
//! - **No persistence**: events are dropped if no subscriber is attached at
//!   send time. The observability path is fire-and-forget by design.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender); every component
/// of the runtime carries its own clone and publishes independently.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    ///
    /// Capacity is shared across all receivers; the minimum is 1 (clamped).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active subscribers.
    ///
    /// If there are no receivers the event is dropped; this function still
    /// returns immediately.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    ///
    /// A receiver only gets events sent **after** it subscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(Event::now(EventKind::TaskEnqueued).with_device("d1"));

        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.kind, EventKind::TaskEnqueued);
        assert_eq!(ev.device.as_deref(), Some("d1"));
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let bus = Bus::new(1);
        bus.publish(Event::now(EventKind::GateCleared));
    }
}
