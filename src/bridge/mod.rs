//! # Bridge abstraction over the external device-control tool.
//!
//! Every emulated device is driven through an external command-line bridge
//! daemon (one `execute` call = one command against one device). The runtime
//! only ever talks to it through the [`Bridge`] trait, so tests substitute a
//! scriptable mock and production wires in [`ShellBridge`].
//!
//! ## Contract
//! - [`Bridge::execute`] runs one command against one serial and returns the
//!   captured output. It must raise [`BridgeError::Offline`] — not a generic
//!   error — when the daemon reports the device gone or unresolvable; the
//!   pool's single-retry branch depends on that distinction.
//! - [`Bridge::devices`] lists currently attached sessions (discovery).
//! - A session supports **concurrent dispatch**: callers may execute several
//!   commands against the same serial simultaneously.
//! - Timeouts are the caller's concern. The pool races every dispatch
//!   against its own deadline and deliberately leaves the bridge process
//!   running on expiry.

mod shell;

pub use shell::ShellBridge;

use async_trait::async_trait;

use crate::error::BridgeError;

/// Captured output of one bridge command.
#[derive(Debug, Clone)]
pub struct BridgeOutput {
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
}

/// One attached device session as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Bridge-level session serial.
    pub serial: String,
    /// Whether the session is usable (`false` for offline/unauthorized).
    pub online: bool,
}

/// Contract for the external command-line bridge tool.
#[async_trait]
pub trait Bridge: Send + Sync + 'static {
    /// Executes one command against one device session.
    ///
    /// `command` is the bridge-tool argument string (e.g. `"shell input tap
    /// 100 200"`); the implementation is responsible for addressing the
    /// session identified by `serial`.
    async fn execute(&self, serial: &str, command: &str) -> Result<BridgeOutput, BridgeError>;

    /// Lists attached device sessions.
    async fn devices(&self) -> Result<Vec<DeviceEntry>, BridgeError>;
}
