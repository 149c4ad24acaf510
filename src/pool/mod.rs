//! # Connection pool: device reference → live, health-checked bridge session.
//!
//! ## Contents
//! - [`DeviceRef`] — logical device identifier (console port or serial)
//! - [`ConnectionPool`] — resolution cache, health tracking, command
//!   de-duplication, single offline retry, staleness sweep
//! - [`ExecOptions`], [`PoolStats`] — call options and introspection
//!
//! ## Flow
//! ```text
//! execute(ref, cmd, opts)
//!   ├─► resolve(ref)            TTL cache unless bypassed/expired
//!   ├─► confirm_health(serial)  probe unless used within freshness window
//!   ├─► dispatch(serial, cmd)   coalesced with identical in-flight calls,
//!   │                           raced against the timeout
//!   └─► on offline-class error: invalidate cache, retry exactly once
//! ```

mod pool;
mod record;

pub use pool::{ConnectionPool, ExecOptions, PoolStats};

use std::fmt;

/// Logical identifier for a device: either the emulator console port or an
/// explicit bridge session serial.
///
/// A port maps onto the conventional emulator serial:
///
/// ```
/// use fleetvisor::DeviceRef;
///
/// assert_eq!(DeviceRef::Port(5554).expected_serial(), "emulator-5554");
/// assert_eq!(DeviceRef::Serial("abc123".into()).expected_serial(), "abc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceRef {
    /// Emulator console port.
    Port(u16),
    /// Explicit bridge session serial.
    Serial(String),
}

impl DeviceRef {
    /// The serial this reference should resolve to, before discovery
    /// confirms the session is actually attached and online.
    pub fn expected_serial(&self) -> String {
        match self {
            DeviceRef::Port(port) => format!("emulator-{port}"),
            DeviceRef::Serial(serial) => serial.clone(),
        }
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRef::Port(port) => write!(f, "port:{port}"),
            DeviceRef::Serial(serial) => write!(f, "serial:{serial}"),
        }
    }
}

impl From<u16> for DeviceRef {
    fn from(port: u16) -> Self {
        DeviceRef::Port(port)
    }
}

impl From<&str> for DeviceRef {
    fn from(serial: &str) -> Self {
        DeviceRef::Serial(serial.to_string())
    }
}
