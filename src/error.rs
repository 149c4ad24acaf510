//! Error types used by the fleetvisor runtime.
//!
//! This module defines the error enums for each runtime concern:
//!
//! - [`BridgeError`] — failures of the external command-line bridge tool.
//! - [`PoolError`] — failures raised by the connection pool.
//! - [`GateError`] — admission failures raised by the concurrency gates.
//! - [`WorkerError`] — failures raised by the worker supervisor.
//!
//! All types provide `as_label()` returning a short stable snake_case label
//! for logs/metrics. `BridgeError` additionally exposes
//! [`BridgeError::is_offline`], which drives the pool's single-retry branch.
//!
//! Note that "task not found" is deliberately **not** an error here: the task
//! queue treats unknown or already-terminal ids as idempotent no-ops, because
//! its callers live in separate worker processes and may race or retry.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the external bridge tool.
///
/// The pool's retry logic depends on telling "the device is gone or was never
/// resolvable" apart from generic command failure, so that class gets its own
/// variant rather than a string match.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// The bridge daemon reported the device as offline or could not find it.
    #[error("device offline or unresolvable: {serial}")]
    Offline {
        /// The serial the bridge was asked for.
        serial: String,
    },

    /// The bridge command ran but exited with a non-zero status.
    #[error("bridge command {command:?} exited with code {code}: {stderr}")]
    NonZeroExit {
        /// The command that was dispatched.
        command: String,
        /// The exit code reported by the bridge tool.
        code: i32,
        /// Captured stderr (may be empty).
        stderr: String,
    },

    /// The bridge binary could not be spawned or its output not read.
    #[error("bridge io failure: {message}")]
    Io {
        /// The underlying io error message.
        message: String,
    },
}

impl BridgeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BridgeError::Offline { .. } => "bridge_offline",
            BridgeError::NonZeroExit { .. } => "bridge_non_zero_exit",
            BridgeError::Io { .. } => "bridge_io",
        }
    }

    /// True for the "device offline/unresolvable" failure class.
    ///
    /// The pool invalidates its serial cache and retries resolution exactly
    /// once when this returns `true`; every other bridge error passes through
    /// untouched.
    pub fn is_offline(&self) -> bool {
        matches!(self, BridgeError::Offline { .. })
    }
}

/// # Errors produced by the connection pool.
///
/// `Clone` is required because coalesced callers of an in-flight command all
/// receive the same outcome through a broadcast cell.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use fleetvisor::PoolError;
///
/// let err = PoolError::CommandTimeout { timeout: Duration::from_secs(5) };
/// assert_eq!(err.as_label(), "pool_command_timeout");
/// ```
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// Serial lookup failed after the single re-resolution retry.
    #[error("cannot resolve device {device}")]
    Unresolved {
        /// The device reference that could not be resolved.
        device: String,
    },

    /// The health probe failed; the connection is marked unhealthy.
    ///
    /// Recovery is the caller's responsibility (typically the worker
    /// supervisor relaunching the device), not the pool's.
    #[error("device {serial} is unresponsive")]
    Unhealthy {
        /// Serial of the unresponsive device.
        serial: String,
    },

    /// A dispatched command did not return within its timeout.
    ///
    /// Distinct from [`PoolError::Bridge`] so callers can tell a slow device
    /// from a dead one. The underlying bridge process is not killed; orphaned
    /// side effects are possible.
    #[error("command timed out after {timeout:?}")]
    CommandTimeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// A bridge failure that the pool does not handle itself.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl PoolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::Unresolved { .. } => "pool_unresolved",
            PoolError::Unhealthy { .. } => "pool_unhealthy",
            PoolError::CommandTimeout { .. } => "pool_command_timeout",
            PoolError::Bridge(e) => e.as_label(),
        }
    }
}

/// # Errors produced by the concurrency gates.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The operation was queued and the queue was cleared before it ran.
    #[error("gate {gate} queue cleared while waiting")]
    QueueCleared {
        /// Name of the gate ("launch" or "script").
        gate: String,
    },

    /// `wait_for_idle` gave up before both gates drained.
    #[error("gates still busy after {timeout_ms}ms")]
    IdleTimeout {
        /// The wait bound that was exceeded, in milliseconds.
        timeout_ms: u64,
    },
}

impl GateError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            GateError::QueueCleared { .. } => "gate_queue_cleared",
            GateError::IdleTimeout { .. } => "gate_idle_timeout",
        }
    }
}

/// # Errors produced while executing one task.
///
/// Task execution crosses two seams (gate admission, pool dispatch); this
/// enum folds both so the worker runtime can record one failure reason.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum AutomationError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Gate(#[from] GateError),
}

impl AutomationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            AutomationError::Pool(e) => e.as_label(),
            AutomationError::Gate(e) => e.as_label(),
        }
    }
}

/// # Errors produced by the worker supervisor.
///
/// A worker exceeding its restart budget is surfaced through the status API
/// (`WorkerState::Failed`), not through this enum — the error variant exists
/// for callers that explicitly ask to start a permanently failed device.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The worker process could not be spawned.
    #[error("failed to spawn worker for {device}: {message}")]
    SpawnFailed {
        /// Device the worker was meant to serve.
        device: String,
        /// The underlying spawn error message.
        message: String,
    },

    /// The device exhausted its restart budget and is permanently failed.
    #[error("worker for {device} exceeded {restarts} restarts")]
    ExceededRestarts {
        /// Device the worker was serving.
        device: String,
        /// The restart cap that was hit.
        restarts: u32,
    },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::SpawnFailed { .. } => "worker_spawn_failed",
            WorkerError::ExceededRestarts { .. } => "worker_exceeded_restarts",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_classification() {
        let offline = BridgeError::Offline {
            serial: "emulator-5554".into(),
        };
        assert!(offline.is_offline());

        let generic = BridgeError::NonZeroExit {
            command: "shell ls".into(),
            code: 1,
            stderr: String::new(),
        };
        assert!(!generic.is_offline());
    }

    #[test]
    fn bridge_label_passes_through_pool() {
        let err = PoolError::Bridge(BridgeError::Io {
            message: "broken pipe".into(),
        });
        assert_eq!(err.as_label(), "bridge_io");
    }
}
