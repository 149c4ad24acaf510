//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings bundle for the fleet
//! runtime, split into one section per component:
//!
//! - [`PoolConfig`] — serial cache TTL, health freshness, sweep cadence
//! - [`GateConfig`] — launch/script slot maxima and batch pacing
//! - [`QueueConfig`] — terminal-task retention window
//! - [`SupervisorConfig`] — worker command, restarts, cool-down, log dir
//! - [`RunnerConfig`] — worker-side poll interval, heartbeat, drain bound
//!
//! ## Sentinel values
//! - `PoolConfig::command_timeout = 0s` → no default timeout on commands
//! - `RunnerConfig::heartbeat_every = 0` → heartbeat disabled

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy};

/// Global configuration for the fleet runtime.
///
/// All fields are public for flexibility; each section carries its own
/// documented defaults so a plain `Config::default()` matches the constants
/// the runtime was tuned for.
#[derive(Clone, Debug)]
pub struct Config {
    /// Connection pool settings.
    pub pool: PoolConfig,
    /// Concurrency gate settings (both instances).
    pub gates: GateConfig,
    /// Task queue settings.
    pub queue: QueueConfig,
    /// Worker supervisor settings.
    pub supervisor: SupervisorConfig,
    /// Worker-side poll loop settings.
    pub runner: RunnerConfig,
    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages
    /// will observe `Lagged` and skip older items. Minimum value is 1
    /// (clamped by the bus).
    pub bus_capacity: usize,
}

impl Default for Config {
    /// Section defaults plus `bus_capacity = 256`.
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            gates: GateConfig::default(),
            queue: QueueConfig::default(),
            supervisor: SupervisorConfig::default(),
            runner: RunnerConfig::default(),
            bus_capacity: 256,
        }
    }
}

impl Config {
    /// Returns the bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

/// Connection pool settings.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// How long a discovered serial stays memoized before the next
    /// resolution triggers fresh discovery.
    pub serial_ttl: Duration,

    /// Window within which a recently used connection skips the explicit
    /// health probe before dispatch.
    pub health_freshness: Duration,

    /// Interval between staleness sweeps.
    pub sweep_interval: Duration,

    /// Connections unused for longer than this are evicted by the sweep.
    pub idle_eviction: Duration,

    /// Default command timeout when the caller does not pass one.
    ///
    /// `Duration::ZERO` means no default timeout.
    pub command_timeout: Duration,
}

impl Default for PoolConfig {
    /// Defaults:
    /// - `serial_ttl = 30s`
    /// - `health_freshness = 60s`
    /// - `sweep_interval = 60s`
    /// - `idle_eviction = 5min`
    /// - `command_timeout = 30s`
    fn default() -> Self {
        Self {
            serial_ttl: Duration::from_secs(30),
            health_freshness: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            idle_eviction: Duration::from_secs(300),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Returns the default command timeout as an `Option`.
    ///
    /// - `None` → no timeout
    /// - `Some(d)` → applied when the caller passes no explicit timeout
    #[inline]
    pub fn default_timeout(&self) -> Option<Duration> {
        if self.command_timeout == Duration::ZERO {
            None
        } else {
            Some(self.command_timeout)
        }
    }
}

/// Concurrency gate settings.
///
/// Two independent instances share one design: the **launch** gate bounds
/// device boots, the **script** gate bounds script executions. Each has its
/// own maximum; batch pacing applies to both.
#[derive(Clone, Debug)]
pub struct GateConfig {
    /// Maximum simultaneous device launches.
    pub launch_max: usize,

    /// Maximum simultaneous script executions.
    pub script_max: usize,

    /// Delay between starts *within* one batch chunk.
    ///
    /// Booting several devices at the exact same instant overloads the host;
    /// a small stagger smooths the spike.
    pub batch_stagger: Duration,

    /// Delay *between* batch chunks.
    pub batch_chunk_delay: Duration,

    /// Poll period used by `wait_for_idle`.
    pub idle_poll: Duration,
}

impl Default for GateConfig {
    /// Defaults:
    /// - `launch_max = 3`, `script_max = 5`
    /// - `batch_stagger = 500ms`, `batch_chunk_delay = 2s`
    /// - `idle_poll = 50ms`
    fn default() -> Self {
        Self {
            launch_max: 3,
            script_max: 5,
            batch_stagger: Duration::from_millis(500),
            batch_chunk_delay: Duration::from_secs(2),
            idle_poll: Duration::from_millis(50),
        }
    }
}

/// Task queue settings.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Terminal tasks older than this are dropped by `cleanup`.
    ///
    /// Pending and processing tasks are never dropped regardless of age —
    /// the window is a size bound, not a correctness mechanism.
    pub terminal_retention: Duration,

    /// How often [`TaskQueue::spawn_cleanup`] sweeps for expired terminal
    /// tasks.
    ///
    /// [`TaskQueue::spawn_cleanup`]: crate::queue::TaskQueue::spawn_cleanup
    pub cleanup_interval: Duration,
}

impl Default for QueueConfig {
    /// Default: `terminal_retention = 60min`, `cleanup_interval = 60s`.
    fn default() -> Self {
        Self {
            terminal_retention: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Worker supervisor settings.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Program used to spawn a worker process.
    ///
    /// The device id is appended as the final argument, after
    /// [`SupervisorConfig::worker_args`].
    pub worker_program: String,

    /// Fixed arguments passed to every worker process.
    pub worker_args: Vec<String>,

    /// Directory for per-device append-only log files
    /// (`<logs_dir>/<device>.log`).
    pub logs_dir: PathBuf,

    /// Restart budget: once a device's restart count reaches this cap it is
    /// marked permanently failed and no further restarts are scheduled.
    pub max_restarts: u32,

    /// Cool-down between a crash and the scheduled restart.
    ///
    /// The default is a constant 5s (`factor = 1.0`); point `factor` above
    /// 1.0 and pick a jitter to spread restarts of a flaky daemon.
    pub restart_backoff: BackoffPolicy,

    /// Grace given to a worker after SIGTERM before it is force-killed.
    pub stop_grace: Duration,

    /// Pause between stop and start during `restart_worker`.
    pub restart_pause: Duration,
}

impl Default for SupervisorConfig {
    /// Defaults:
    /// - `worker_program = "fleet-worker"`, no fixed args
    /// - `logs_dir = "logs"`
    /// - `max_restarts = 10`
    /// - `restart_backoff = constant 5s, no jitter`
    /// - `stop_grace = 10s`, `restart_pause = 1s`
    fn default() -> Self {
        Self {
            worker_program: "fleet-worker".to_string(),
            worker_args: Vec::new(),
            logs_dir: PathBuf::from("logs"),
            max_restarts: 10,
            restart_backoff: BackoffPolicy {
                first: Duration::from_secs(5),
                max: Duration::from_secs(60),
                factor: 1.0,
                jitter: JitterPolicy::None,
            },
            stop_grace: Duration::from_secs(10),
            restart_pause: Duration::from_secs(1),
        }
    }
}

/// Worker-side poll loop settings.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Interval between task queue polls.
    pub poll_interval: Duration,

    /// Emit a heartbeat (with queue depth) every N poll ticks; 0 disables.
    pub heartbeat_every: u32,

    /// How long an in-flight task may keep running after a stop request
    /// before it is force-failed.
    pub drain_timeout: Duration,
}

impl Default for RunnerConfig {
    /// Defaults:
    /// - `poll_interval = 2s`
    /// - `heartbeat_every = 15` ticks (30s at the default interval)
    /// - `drain_timeout = 5min`
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            heartbeat_every: 15,
            drain_timeout: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_command_timeout_means_none() {
        let mut cfg = PoolConfig::default();
        cfg.command_timeout = Duration::ZERO;
        assert!(cfg.default_timeout().is_none());

        cfg.command_timeout = Duration::from_secs(5);
        assert_eq!(cfg.default_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn bus_capacity_is_clamped() {
        let cfg = Config::default();
        assert!(cfg.bus_capacity_clamped() >= 1);
    }
}
