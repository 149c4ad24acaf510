//! # Single concurrency gate.
//!
//! A [`Gate`] caps how many operations of one class run at once. Admission
//! is strict FIFO: when every slot is busy, callers park in an ordered queue
//! and are granted slots in arrival order as slots free up.
//!
//! ## Rules
//! - A slot is held by a [`SlotGuard`] and released on drop, so panics and
//!   cancellation inside the gated future cannot leak a slot. Handover to a
//!   parked waiter sends the guard itself, so a waiter abandoned at the
//!   grant instant still returns the slot.
//! - While the queue is non-empty, newcomers queue even if a slot is
//!   momentarily free; releases always hand the slot to the head waiter.
//! - [`Gate::clear_queue`] rejects every parked waiter with
//!   [`GateError::QueueCleared`]; operations already holding a slot finish
//!   normally.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time;

use crate::error::GateError;
use crate::events::{Bus, Event, EventKind};

/// Point-in-time view of one gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStatus {
    /// Operations currently holding a slot.
    pub active: usize,
    /// Slot capacity.
    pub max: usize,
    /// Waiters parked in the FIFO queue.
    pub queued: usize,
}

impl GateStatus {
    /// True when nothing holds a slot and nothing is queued.
    pub fn is_idle(&self) -> bool {
        self.active == 0 && self.queued == 0
    }
}

/// Outcome of one batch item, labelled by the caller's id.
#[derive(Debug)]
pub struct BatchResult<T> {
    pub id: String,
    pub outcome: Result<T, GateError>,
}

struct Waiter {
    id: String,
    grant: oneshot::Sender<Result<SlotGuard, GateError>>,
}

#[derive(Default)]
struct GateState {
    active: Vec<String>,
    queue: VecDeque<Waiter>,
}

/// FIFO-admitted concurrency cap for one class of operations.
pub struct Gate {
    stagger: Duration,
    chunk_delay: Duration,
    shared: Arc<GateShared>,
}

/// State shared between the gate and every outstanding [`SlotGuard`].
struct GateShared {
    name: Arc<str>,
    max: usize,
    bus: Bus,
    state: StdMutex<GateState>,
}

/// Held slot; returning it to the gate happens on drop.
///
/// The guard is owned, so a grant parked in a waiter's channel still
/// releases the slot when the waiter abandons it without ever reading.
struct SlotGuard {
    shared: Arc<GateShared>,
    id: Option<String>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            GateShared::release(&self.shared, &id);
        }
    }
}

impl Gate {
    /// Creates a gate with `max` slots (clamped to at least one).
    ///
    /// `stagger` spaces out item starts inside one batch chunk;
    /// `chunk_delay` spaces out the chunks themselves.
    pub fn new(
        name: impl Into<Arc<str>>,
        max: usize,
        stagger: Duration,
        chunk_delay: Duration,
        bus: Bus,
    ) -> Arc<Self> {
        Arc::new(Self {
            stagger,
            chunk_delay,
            shared: Arc::new(GateShared {
                name: name.into(),
                max: max.max(1),
                bus,
                state: StdMutex::new(GateState::default()),
            }),
        })
    }

    /// The gate's name, used in events and errors.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Runs `fut` once a slot is granted, releasing the slot when the future
    /// settles (or is dropped).
    ///
    /// `id` labels the operation in queue events and status output.
    ///
    /// Fails with [`GateError::QueueCleared`] if the queue is flushed while
    /// this caller is still parked.
    pub async fn run<T, F>(&self, id: &str, fut: F) -> Result<T, GateError>
    where
        F: Future<Output = T>,
    {
        let _slot = self.acquire(id).await?;
        Ok(fut.await)
    }

    /// Runs every `(id, future)` item through the gate, chunked by the
    /// gate's `max`.
    ///
    /// Items inside a chunk run in parallel with starts `stagger` apart;
    /// the next chunk begins `chunk_delay` after the previous one finishes.
    /// Outcomes come back in item order, labelled by id.
    pub async fn run_batch<T, F>(&self, mut items: Vec<(String, F)>) -> Vec<BatchResult<T>>
    where
        F: Future<Output = T>,
    {
        let mut results = Vec::with_capacity(items.len());
        while !items.is_empty() {
            let rest = items.split_off(items.len().min(self.shared.max));
            let chunk = std::mem::replace(&mut items, rest);

            let futs = chunk.into_iter().enumerate().map(|(pos, (id, fut))| {
                let start = self.stagger * pos as u32;
                async move {
                    if start > Duration::ZERO {
                        time::sleep(start).await;
                    }
                    let outcome = self.run(&id, fut).await;
                    BatchResult { id, outcome }
                }
            });
            results.extend(futures::future::join_all(futs).await);

            if !items.is_empty() && self.chunk_delay > Duration::ZERO {
                time::sleep(self.chunk_delay).await;
            }
        }
        results
    }

    /// Snapshot of slot occupancy and queue depth.
    pub fn status(&self) -> GateStatus {
        let st = self.shared.lock_state();
        GateStatus {
            active: st.active.len(),
            max: self.shared.max,
            queued: st.queue.len(),
        }
    }

    /// Rejects every parked waiter and returns how many were flushed.
    pub fn clear_queue(&self) -> usize {
        let drained: Vec<Waiter> = {
            let mut st = self.shared.lock_state();
            st.queue.drain(..).collect()
        };
        let flushed = drained.len();
        for waiter in drained {
            let _ = waiter.grant.send(Err(GateError::QueueCleared {
                gate: self.shared.name.to_string(),
            }));
        }
        if flushed > 0 {
            self.shared.bus.publish(
                Event::now(EventKind::GateCleared)
                    .with_gate(Arc::clone(&self.shared.name))
                    .with_depth(flushed),
            );
        }
        flushed
    }

    async fn acquire(&self, id: &str) -> Result<SlotGuard, GateError> {
        let waiting = {
            let mut st = self.shared.lock_state();
            if st.active.len() < self.shared.max && st.queue.is_empty() {
                st.active.push(id.to_string());
                None
            } else {
                let (tx, rx) = oneshot::channel();
                st.queue.push_back(Waiter {
                    id: id.to_string(),
                    grant: tx,
                });
                let depth = st.queue.len();
                drop(st);
                self.shared.bus.publish(
                    Event::now(EventKind::GateQueued)
                        .with_gate(Arc::clone(&self.shared.name))
                        .with_reason(id.to_string())
                        .with_depth(depth),
                );
                Some(rx)
            }
        };

        match waiting {
            None => Ok(SlotGuard {
                shared: Arc::clone(&self.shared),
                id: Some(id.to_string()),
            }),
            Some(rx) => match rx.await {
                Ok(granted) => granted,
                // Gate dropped while we were parked.
                Err(_) => Err(GateError::QueueCleared {
                    gate: self.shared.name.to_string(),
                }),
            },
        }
    }
}

impl GateShared {
    /// Frees `id`'s slot and hands it to the head waiter as an owned
    /// [`SlotGuard`].
    ///
    /// The grantee owns the slot before it learns about it, so the active
    /// count never undershoots between release and resume. If the waiter
    /// already gave up (dropped its receiver), the returned guard comes
    /// back here and the next waiter is tried; a grant that lands in the
    /// channel but is never read releases itself through the guard's drop.
    fn release(shared: &Arc<Self>, id: &str) {
        let mut freed = Some(id.to_string());
        loop {
            let waiter = {
                let mut st = shared.lock_state();
                if let Some(done) = freed.take() {
                    if let Some(pos) = st.active.iter().position(|a| *a == done) {
                        st.active.remove(pos);
                    }
                }
                if st.active.len() >= shared.max {
                    return;
                }
                let Some(waiter) = st.queue.pop_front() else {
                    return;
                };
                st.active.push(waiter.id.clone());
                waiter
            };

            let guard = SlotGuard {
                shared: Arc::clone(shared),
                id: Some(waiter.id),
            };
            match waiter.grant.send(Ok(guard)) {
                Ok(()) => return,
                Err(unclaimed) => {
                    // Disarm the rejected guard and reclaim its slot on the
                    // next loop turn, outside the lock.
                    if let Ok(mut guard) = unclaimed {
                        freed = guard.id.take();
                    }
                }
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gate(max: usize) -> Arc<Gate> {
        Gate::new(
            "test",
            max,
            Duration::from_millis(1),
            Duration::from_millis(5),
            Bus::new(16),
        )
    }

    #[tokio::test]
    async fn never_exceeds_max_concurrency() {
        let g = gate(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let g = Arc::clone(&g);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                g.run(&format!("op-{i}"), async {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "cap was exceeded");
        assert!(g.status().is_idle());
    }

    #[tokio::test]
    async fn waiters_are_admitted_in_arrival_order() {
        let g = gate(1);
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let g = Arc::clone(&g);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                g.run(&format!("op-{i}"), async move {
                    order.lock().unwrap().push(i);
                    time::sleep(Duration::from_millis(10)).await;
                })
                .await
            }));
            // Serialize arrival so queue order is deterministic.
            time::sleep(Duration::from_millis(3)).await;
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn slot_is_released_when_operation_fails() {
        let g = gate(1);

        let res: Result<Result<(), &str>, GateError> =
            g.run("failing", async { Err("boom") }).await;
        assert!(res.unwrap().is_err());

        // The slot must be free again.
        let out = g.run("next", async { 7 }).await.unwrap();
        assert_eq!(out, 7);
        assert!(g.status().is_idle());
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_leak_its_granted_slot() {
        let g = gate(1);

        let holder = {
            let g = Arc::clone(&g);
            tokio::spawn(async move {
                g.run("holder", async {
                    time::sleep(Duration::from_millis(20)).await;
                })
                .await
            })
        };
        time::sleep(Duration::from_millis(5)).await;

        // Park a second caller, then abandon it after the holder has
        // already handed it the slot but before it ever reads the grant.
        let mut parked = Box::pin(g.run("parked", async {}));
        assert!(futures::poll!(parked.as_mut()).is_pending());
        assert_eq!(g.status().queued, 1);

        holder.await.unwrap().unwrap();
        drop(parked);

        // The slot must be reusable and the gate fully idle.
        g.run("next", async {}).await.unwrap();
        assert!(g.status().is_idle());
    }

    #[tokio::test]
    async fn clear_queue_rejects_parked_waiters_only() {
        let g = gate(1);

        let holder = {
            let g = Arc::clone(&g);
            tokio::spawn(async move {
                g.run("holder", async {
                    time::sleep(Duration::from_millis(60)).await;
                    "done"
                })
                .await
            })
        };
        time::sleep(Duration::from_millis(5)).await;

        let parked = {
            let g = Arc::clone(&g);
            tokio::spawn(async move { g.run("parked", async { "never" }).await })
        };
        time::sleep(Duration::from_millis(5)).await;
        assert_eq!(g.status().queued, 1);

        assert_eq!(g.clear_queue(), 1);
        let err = parked.await.unwrap().unwrap_err();
        assert!(matches!(err, GateError::QueueCleared { .. }));

        // The in-flight holder is untouched.
        assert_eq!(holder.await.unwrap().unwrap(), "done");
    }

    #[tokio::test]
    async fn batch_preserves_item_order_in_results() {
        let g = gate(2);
        let items = (0..5)
            .map(|i| (format!("item-{i}"), async move { i * 10 }))
            .collect();
        let results = g.run_batch(items).await;
        assert_eq!(results.len(), 5);
        for (i, res) in results.iter().enumerate() {
            assert_eq!(res.id, format!("item-{i}"));
            assert_eq!(*res.outcome.as_ref().unwrap(), (i as i32) * 10);
        }
    }

    #[tokio::test]
    async fn batch_runs_chunks_sequentially() {
        let g = gate(2);
        let order = Arc::new(StdMutex::new(Vec::new()));
        let items = (0..4)
            .map(|i| {
                let order = Arc::clone(&order);
                (format!("item-{i}"), async move {
                    order.lock().unwrap().push(i);
                    time::sleep(Duration::from_millis(10)).await;
                })
            })
            .collect();
        g.run_batch(items).await;

        // Chunk {0,1} must fully precede chunk {2,3}.
        let seen = order.lock().unwrap().clone();
        let first_chunk_end = seen.iter().position(|&i| i >= 2).unwrap();
        assert!(seen[..first_chunk_end].iter().all(|&i| i < 2));
        assert_eq!(first_chunk_end, 2);
    }

    #[tokio::test]
    async fn queueing_publishes_depth_events() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let g = Gate::new("evt", 1, Duration::ZERO, Duration::ZERO, bus);

        let holder = {
            let g = Arc::clone(&g);
            tokio::spawn(async move {
                g.run("holder", async {
                    time::sleep(Duration::from_millis(30)).await;
                })
                .await
            })
        };
        time::sleep(Duration::from_millis(5)).await;

        let waiter = {
            let g = Arc::clone(&g);
            tokio::spawn(async move { g.run("waiter", async {}).await })
        };
        time::sleep(Duration::from_millis(5)).await;

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::GateQueued);
        assert_eq!(ev.depth, Some(1));

        holder.await.unwrap().unwrap();
        waiter.await.unwrap().unwrap();
    }
}
