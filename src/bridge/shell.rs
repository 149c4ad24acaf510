//! # Shell-backed bridge implementation.
//!
//! [`ShellBridge`] drives the real command-line bridge tool through
//! `tokio::process`. One `execute` call spawns one short-lived tool process:
//! `<program> -s <serial> <command...>`; discovery runs `<program> devices`
//! and parses the tab-separated session table.
//!
//! Offline classification is textual: the daemon reports a vanished device
//! on stderr (`device offline`, `device '…' not found`), and those messages
//! are the only reliable signal it gives.

use std::process::Stdio;

use tokio::process::Command;

use super::{Bridge, BridgeOutput, DeviceEntry};
use crate::error::BridgeError;

/// Bridge implementation that shells out to the external tool.
pub struct ShellBridge {
    program: String,
}

impl ShellBridge {
    /// Creates a bridge around the given tool binary (e.g. `"adb"`).
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<BridgeOutput, BridgeError> {
        let rendered = args.join(" ");
        let out = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BridgeError::Io {
                message: format!("spawn {}: {e}", self.program),
            })?;

        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&out.stderr).into_owned();

        if out.status.success() {
            return Ok(BridgeOutput { stdout, stderr });
        }

        let lowered = stderr.to_ascii_lowercase();
        if lowered.contains("offline") || lowered.contains("not found") {
            // The serial is the value after "-s" when present.
            let serial = args
                .iter()
                .position(|a| *a == "-s")
                .and_then(|i| args.get(i + 1))
                .map_or_else(String::new, |s| (*s).to_string());
            return Err(BridgeError::Offline { serial });
        }

        Err(BridgeError::NonZeroExit {
            command: rendered,
            code: out.status.code().unwrap_or(-1),
            stderr,
        })
    }
}

#[async_trait::async_trait]
impl Bridge for ShellBridge {
    async fn execute(&self, serial: &str, command: &str) -> Result<BridgeOutput, BridgeError> {
        let mut args = vec!["-s", serial];
        args.extend(command.split_whitespace());
        self.run(&args).await
    }

    async fn devices(&self) -> Result<Vec<DeviceEntry>, BridgeError> {
        let out = self.run(&["devices"]).await?;
        Ok(parse_device_table(&out.stdout))
    }
}

/// Parses the `devices` listing: one `serial\tstate` line per session,
/// header and blank lines skipped.
fn parse_device_table(stdout: &str) -> Vec<DeviceEntry> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let serial = cols.next()?;
            let state = cols.next()?;
            Some(DeviceEntry {
                serial: serial.to_string(),
                online: state == "device",
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_table() {
        let table = "List of devices attached\n\
                     emulator-5554\tdevice\n\
                     emulator-5556\toffline\n\
                     \n";
        let entries = parse_device_table(table);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].serial, "emulator-5554");
        assert!(entries[0].online);
        assert_eq!(entries[1].serial, "emulator-5556");
        assert!(!entries[1].online);
    }

    #[test]
    fn empty_table_yields_no_entries() {
        assert!(parse_device_table("List of devices attached\n").is_empty());
    }
}
