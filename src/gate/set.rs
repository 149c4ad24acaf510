//! # The standard pair of gates and whole-set operations.
//!
//! Device launches and script executions contend for different resources
//! (boot CPU spikes vs. sustained bridge traffic), so each class gets its
//! own independently-capped [`Gate`]. [`GateSet`] owns the pair and offers
//! the cross-cutting operations: quiescence waiting and queue flushing.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use super::gate::{Gate, GateStatus};
use crate::config::GateConfig;
use crate::error::GateError;
use crate::events::Bus;

/// Combined snapshot of both gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSetStatus {
    pub launch: GateStatus,
    pub script: GateStatus,
}

impl GateSetStatus {
    /// True when both gates are idle.
    pub fn is_idle(&self) -> bool {
        self.launch.is_idle() && self.script.is_idle()
    }
}

/// The launch gate and the script gate, plus set-wide operations.
pub struct GateSet {
    launch: Arc<Gate>,
    script: Arc<Gate>,
    idle_poll: Duration,
}

impl GateSet {
    /// Builds both gates from configuration, sharing one event bus.
    pub fn new(cfg: &GateConfig, bus: Bus) -> Self {
        Self {
            launch: Gate::new(
                "launch",
                cfg.launch_max,
                cfg.batch_stagger,
                cfg.batch_chunk_delay,
                bus.clone(),
            ),
            script: Gate::new(
                "script",
                cfg.script_max,
                cfg.batch_stagger,
                cfg.batch_chunk_delay,
                bus,
            ),
            idle_poll: cfg.idle_poll,
        }
    }

    /// Gate capping concurrent device launches.
    pub fn launch(&self) -> &Arc<Gate> {
        &self.launch
    }

    /// Gate capping concurrent script executions.
    pub fn script(&self) -> &Arc<Gate> {
        &self.script
    }

    /// Snapshot of both gates.
    pub fn status(&self) -> GateSetStatus {
        GateSetStatus {
            launch: self.launch.status(),
            script: self.script.status(),
        }
    }

    /// Polls until both gates are idle (no slots held, nothing queued).
    ///
    /// Fails with [`GateError::IdleTimeout`] if quiescence is not reached
    /// within `timeout`.
    pub async fn wait_for_idle(&self, timeout: Duration) -> Result<(), GateError> {
        let deadline = time::Instant::now() + timeout;
        loop {
            if self.status().is_idle() {
                return Ok(());
            }
            if time::Instant::now() >= deadline {
                return Err(GateError::IdleTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            time::sleep(self.idle_poll).await;
        }
    }

    /// Flushes both queues, rejecting every parked waiter. Returns the total
    /// number flushed.
    pub fn clear_queues(&self) -> usize {
        self.launch.clear_queue() + self.script.clear_queue()
    }
}
