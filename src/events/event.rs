//! # Runtime events emitted by the pool, gates, queue, and supervisor.
//!
//! The [`EventKind`] enum classifies events across the runtime's concerns:
//!
//! - **Pool events**: probe failures, cache invalidation, sweep evictions
//! - **Gate events**: queueing at capacity, emergency queue clears
//! - **Task events**: enqueue, dispatch, completion, failure
//! - **Worker events**: process lifecycle, restarts, heartbeats
//! - **Subscriber events**: overflow and panic accounting for the fan-out
//!
//! The [`Event`] struct carries optional metadata (device, serial, task id,
//! delays, exit codes) set per kind through builder-style `with_*` methods.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore exact order when events are consumed
//! out of order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason` (panic info), `at`, `seq`.
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` ("full" / "closed"), `at`, `seq`.
    SubscriberOverflow,

    // === Pool events ===
    /// A health probe failed; the connection was marked unhealthy.
    ///
    /// Sets: `serial`, `reason`, `at`, `seq`.
    ProbeFailed,

    /// A cached serial was invalidated after an offline-class failure,
    /// forcing fresh discovery on the retry.
    ///
    /// Sets: `device`, `serial`, `at`, `seq`.
    SerialInvalidated,

    /// The staleness sweep evicted an idle connection record.
    ///
    /// Sets: `serial`, `at`, `seq`.
    ConnectionEvicted,

    // === Gate events ===
    /// An operation arrived at a full gate and was queued FIFO.
    ///
    /// Sets: `gate`, `reason` (operation id), `depth` (queue length), `at`, `seq`.
    GateQueued,

    /// A gate queue was cleared; every queued operation was rejected.
    ///
    /// Sets: `gate`, `depth` (rejected count), `at`, `seq`.
    GateCleared,

    // === Task events ===
    /// A task was appended to a device's queue.
    ///
    /// Sets: `device`, `task`, `at`, `seq`.
    TaskEnqueued,

    /// A pending task was handed to a worker (pending → processing).
    ///
    /// Sets: `device`, `task`, `at`, `seq`.
    TaskDispatched,

    /// A task finished successfully (processing → completed).
    ///
    /// Sets: `device`, `task`, `at`, `seq`.
    TaskCompleted,

    /// A task finished with an error (processing → failed).
    ///
    /// Sets: `device`, `task`, `reason`, `at`, `seq`.
    TaskFailed,

    // === Worker events ===
    /// A worker process is being spawned for a device.
    ///
    /// Sets: `device`, `at`, `seq`.
    WorkerStarting,

    /// The worker process is up.
    ///
    /// Sets: `device`, `pid`, `at`, `seq`.
    WorkerStarted,

    /// The worker process exited.
    ///
    /// Sets: `device`, `pid`, `exit_code` (None if killed by signal), `at`, `seq`.
    WorkerExited,

    /// A restart was scheduled after an abnormal exit.
    ///
    /// Sets: `device`, `attempt` (restart count), `delay_ms`, `at`, `seq`.
    WorkerRestartScheduled,

    /// The restart budget is exhausted; the device is permanently failed.
    ///
    /// Sets: `device`, `attempt` (final restart count), `at`, `seq`.
    WorkerGaveUp,

    /// The worker was stopped deliberately (graceful or forced after grace).
    ///
    /// Sets: `device`, `at`, `seq`.
    WorkerStopped,

    /// Periodic heartbeat from a worker poll loop.
    ///
    /// Sets: `device`, `depth` (queue depth), `at`, `seq`.
    WorkerHeartbeat,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Logical device id, if applicable.
    pub device: Option<Arc<str>>,
    /// Bridge serial, if applicable.
    pub serial: Option<Arc<str>>,
    /// Gate name ("launch" / "script"), if applicable.
    pub gate: Option<Arc<str>>,
    /// Task id, if applicable.
    pub task: Option<Uuid>,
    /// Human-readable reason (errors, overflow details, operation ids).
    pub reason: Option<Arc<str>>,
    /// Restart count or attempt number.
    pub attempt: Option<u32>,
    /// Backoff/restart delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Queue depth or rejected count.
    pub depth: Option<usize>,
    /// Worker process id.
    pub pid: Option<u32>,
    /// Worker exit code (`None` when terminated by signal).
    pub exit_code: Option<i32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next
    /// sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            device: None,
            serial: None,
            gate: None,
            task: None,
            reason: None,
            attempt: None,
            delay_ms: None,
            depth: None,
            pid: None,
            exit_code: None,
        }
    }

    /// Attaches a device id.
    #[inline]
    pub fn with_device(mut self, device: impl Into<Arc<str>>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Attaches a bridge serial.
    #[inline]
    pub fn with_serial(mut self, serial: impl Into<Arc<str>>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Attaches a gate name.
    #[inline]
    pub fn with_gate(mut self, gate: impl Into<Arc<str>>) -> Self {
        self.gate = Some(gate.into());
        self
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_task(mut self, task: Uuid) -> Self {
        self.task = Some(task);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a restart count or attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a queue depth or count.
    #[inline]
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Attaches a worker pid.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches a worker exit code.
    #[inline]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }
}
