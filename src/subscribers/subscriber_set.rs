//! # Non-blocking event fan-out to multiple subscribers.
//!
//! Provides [`SubscriberSet`] — distributes events to multiple subscribers
//! concurrently without blocking the publisher.
//!
//! ## Architecture
//! ```text
//! Bus ──► listener ──► emit_arc(event)
//!                          │
//!                          ├──► [queue 1] ──► worker 1 ──► sub1.on_event()
//!                          │    (bounded)        └───────► panic → SubscriberPanicked
//!                          ├──► [queue 2] ──► worker 2 ──► sub2.on_event()
//!                          └──► [queue N] ──► worker N ──► subN.on_event()
//! ```
//!
//! ## Rules
//! - **No cross-subscriber ordering**: subscriber A may process event N while
//!   B processes N+5; each subscriber individually sees events in order.
//! - **Overflow**: the event is dropped for that subscriber only, and a
//!   `SubscriberOverflow` event is published.
//! - **Non-blocking**: `emit_arc()` returns immediately (uses `try_send`).
//! - **Isolation**: a slow or panicking subscriber does not affect others.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

/// Per-subscriber channel metadata.
struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator for multiple event subscribers.
///
/// Manages per-subscriber queues and worker tasks, providing concurrent
/// delivery, per-subscriber isolation, panic safety, and overflow accounting.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker task per subscriber.
    ///
    /// Each subscriber gets a bounded mpsc queue (capacity from
    /// [`Subscribe::queue_capacity`], minimum 1) and a dedicated worker task
    /// with panic isolation via `catch_unwind`.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let cap = sub.queue_capacity().max(1);
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(cap);
            let s = Arc::clone(&sub);
            let bus_for_worker = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = s.on_event(ev.as_ref());

                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = {
                            let any = &*panic_err;
                            if let Some(msg) = any.downcast_ref::<&'static str>() {
                                (*msg).to_string()
                            } else if let Some(msg) = any.downcast_ref::<String>() {
                                msg.clone()
                            } else {
                                "unknown panic".to_string()
                            }
                        };
                        bus_for_worker.publish(Event::subscriber_panicked(s.name(), info));
                    }
                }
            });
            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }
        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Subscribes to the bus and forwards every event into the fan-out until
    /// the token is cancelled.
    ///
    /// Call once after construction; this is the single consumer that feeds
    /// all subscriber queues. The listener holds a clone of the set, so a
    /// shutdown path that wants to reclaim sole ownership (for
    /// [`SubscriberSet::shutdown`]) must cancel the token and await the
    /// returned handle first.
    pub fn spawn_listener(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let me = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => me.emit_arc(Arc::new(ev)),
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        })
    }

    /// Emits a pre-allocated `Arc<Event>` to all subscribers.
    ///
    /// - Uses `try_send` (non-blocking).
    /// - On queue full or closed: drops the event for that subscriber and
    ///   publishes `SubscriberOverflow`.
    ///
    /// Overflow events are never re-published when they themselves overflow,
    /// which would otherwise loop forever.
    pub fn emit_arc(&self, event: Arc<Event>) {
        let is_overflow_evt = matches!(event.kind, EventKind::SubscriberOverflow);

        for channel in &self.channels {
            match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    if !is_overflow_evt {
                        self.bus
                            .publish(Event::subscriber_overflow(channel.name, "full"));
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    if !is_overflow_evt {
                        self.bus
                            .publish(Event::subscriber_overflow(channel.name, "closed"));
                    }
                }
            }
        }
    }

    /// Gracefully shuts down all subscriber workers.
    ///
    /// Drops all channel senders (workers see the channel closed), then
    /// awaits every worker task.
    pub async fn shutdown(self) {
        drop(self.channels);

        for h in self.workers {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counter(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Subscribe for Counter {
        async fn on_event(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn name(&self) -> &'static str {
            "counter"
        }
    }

    #[tokio::test]
    async fn fans_out_bus_events() {
        let bus = Bus::new(64);
        let seen = Arc::new(AtomicUsize::new(0));
        let set = Arc::new(SubscriberSet::new(
            vec![Arc::new(Counter(seen.clone()))],
            bus.clone(),
        ));
        let token = CancellationToken::new();
        let _listener = set.spawn_listener(token.clone());

        for _ in 0..5 {
            bus.publish(Event::now(EventKind::TaskEnqueued));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        token.cancel();
    }

    struct Panicky;

    #[async_trait::async_trait]
    impl Subscribe for Panicky {
        async fn on_event(&self, _event: &Event) {
            panic!("subscriber blew up");
        }
        fn name(&self) -> &'static str {
            "panicky"
        }
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_stop_others() {
        let bus = Bus::new(64);
        let seen = Arc::new(AtomicUsize::new(0));
        let set = Arc::new(SubscriberSet::new(
            vec![Arc::new(Panicky), Arc::new(Counter(seen.clone()))],
            bus.clone(),
        ));
        let token = CancellationToken::new();
        let _listener = set.spawn_listener(token.clone());

        bus.publish(Event::now(EventKind::TaskEnqueued));
        bus.publish(Event::now(EventKind::TaskCompleted));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        token.cancel();
    }

    #[tokio::test]
    async fn joined_listener_releases_the_set_for_shutdown() {
        let bus = Bus::new(64);
        let seen = Arc::new(AtomicUsize::new(0));
        let set = Arc::new(SubscriberSet::new(
            vec![Arc::new(Counter(seen.clone()))],
            bus.clone(),
        ));
        let token = CancellationToken::new();
        let listener = set.spawn_listener(token.clone());

        bus.publish(Event::now(EventKind::TaskEnqueued));
        tokio::time::sleep(Duration::from_millis(50)).await;

        token.cancel();
        listener.await.unwrap();

        // Once the listener is joined, no clone of the set remains and a
        // full shutdown always runs.
        let set = Arc::try_unwrap(set)
            .ok()
            .expect("listener still holds the set");
        set.shutdown().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
