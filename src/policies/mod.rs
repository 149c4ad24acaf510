//! Retry and restart timing policies.
//!
//! This module groups the knobs that control **how long** to wait between
//! retries and worker restarts.
//!
//! ## Contents
//! - [`BackoffPolicy`] — how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`] — randomization strategy to avoid thundering herd
//!
//! ## Quick wiring
//! ```text
//! SupervisorConfig { restart_backoff: BackoffPolicy, .. }
//!      └─► worker::WorkerSupervisor uses backoff.delay_for(restart_count)
//!          to schedule the cool-down before each restart
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=100ms, factor=1.0 (constant),
//!   max=30s, jitter=None.
//! - The supervisor default overrides `first` to 5s (the restart cool-down).

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
