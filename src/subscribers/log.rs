//! # Logging subscriber.
//!
//! [`LogWriter`] renders runtime events as structured `tracing` records, one
//! line per event, keyed by the event's snake_case kind.
//!
//! ## Output shape
//! ```text
//! INFO worker_started device=device-3 pid=41233
//! WARN task_failed device=device-3 task=0f0c… reason="element not found"
//! WARN worker_restart_scheduled device=device-3 restarts=2 delay_ms=5000
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Structured logging subscriber.
///
/// Forwards every runtime event to the `tracing` pipeline. Heartbeats and
/// gate queueing go to `debug`; failures, overflows, and give-ups go to
/// `warn`; the rest is `info`.
#[derive(Default)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let device = e.device.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ProbeFailed => {
                warn!(
                    serial = e.serial.as_deref().unwrap_or("-"),
                    reason = e.reason.as_deref().unwrap_or("-"),
                    "probe_failed"
                );
            }
            EventKind::SerialInvalidated => {
                info!(
                    device,
                    serial = e.serial.as_deref().unwrap_or("-"),
                    "serial_invalidated"
                );
            }
            EventKind::ConnectionEvicted => {
                debug!(serial = e.serial.as_deref().unwrap_or("-"), "connection_evicted");
            }
            EventKind::GateQueued => {
                debug!(
                    gate = e.gate.as_deref().unwrap_or("-"),
                    op = e.reason.as_deref().unwrap_or("-"),
                    depth = e.depth.unwrap_or(0),
                    "gate_queued"
                );
            }
            EventKind::GateCleared => {
                warn!(
                    gate = e.gate.as_deref().unwrap_or("-"),
                    rejected = e.depth.unwrap_or(0),
                    "gate_cleared"
                );
            }
            EventKind::TaskEnqueued => {
                info!(device, task = ?e.task, "task_enqueued");
            }
            EventKind::TaskDispatched => {
                info!(device, task = ?e.task, "task_dispatched");
            }
            EventKind::TaskCompleted => {
                info!(device, task = ?e.task, "task_completed");
            }
            EventKind::TaskFailed => {
                warn!(
                    device,
                    task = ?e.task,
                    reason = e.reason.as_deref().unwrap_or("-"),
                    "task_failed"
                );
            }
            EventKind::WorkerStarting => {
                info!(device, "worker_starting");
            }
            EventKind::WorkerStarted => {
                info!(device, pid = e.pid.unwrap_or(0), "worker_started");
            }
            EventKind::WorkerExited => {
                info!(device, pid = e.pid.unwrap_or(0), code = ?e.exit_code, "worker_exited");
            }
            EventKind::WorkerRestartScheduled => {
                warn!(
                    device,
                    restarts = e.attempt.unwrap_or(0),
                    delay_ms = e.delay_ms.unwrap_or(0),
                    "worker_restart_scheduled"
                );
            }
            EventKind::WorkerGaveUp => {
                warn!(device, restarts = e.attempt.unwrap_or(0), "worker_gave_up");
            }
            EventKind::WorkerStopped => {
                info!(device, "worker_stopped");
            }
            EventKind::WorkerHeartbeat => {
                debug!(device, depth = e.depth.unwrap_or(0), "worker_heartbeat");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                warn!(reason = e.reason.as_deref().unwrap_or("-"), "subscriber_trouble");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
