//! # WorkerSupervisor implementation.
//!
//! One external worker process per device, kept alive by a monitor task:
//!
//! ```text
//! start_worker(dev)
//!   └─► spawn process ──► monitor
//!         ├─► exit 0            ──► entry removed (done)
//!         ├─► abnormal exit     ──► cool-down, respawn (restart budget)
//!         │     └─► budget hit  ──► state = Failed, no more respawns
//!         └─► stop requested    ──► SIGTERM, grace, SIGKILL, entry removed
//! ```
//!
//! ## Rules
//! - Worker stdout/stderr are appended to `<logs_dir>/<device>.log`.
//! - A crash costs one unit of restart budget; the budget never resets
//!   while the entry lives. A deliberate stop clears the entry (and with
//!   it a `Failed` verdict).
//! - `stop_worker` is idempotent: stopping an unknown device is a no-op.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::WorkerError;
use crate::events::{Bus, Event, EventKind};

/// Lifecycle state of one supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process is up.
    Running,
    /// Crashed; waiting out the cool-down before the next spawn.
    Restarting,
    /// Restart budget exhausted; left in the registry as a verdict.
    Failed,
}

impl WorkerState {
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerState::Running => "running",
            WorkerState::Restarting => "restarting",
            WorkerState::Failed => "failed",
        }
    }
}

/// Per-device parameters carried into the worker process.
///
/// The supervisor passes these through opaquely: device identity, profile,
/// or proxy settings mean nothing to it, they are the worker's business.
#[derive(Debug, Clone, Default)]
pub struct SpawnMeta {
    /// Extra arguments appended after the configured fixed args, before the
    /// device id.
    pub args: Vec<String>,
    /// Environment variables set on the worker process.
    pub env: Vec<(String, String)>,
}

/// Status snapshot of one supervised worker.
#[derive(Debug, Clone)]
pub struct WorkerMeta {
    /// Device the worker serves.
    pub device: String,
    pub state: WorkerState,
    /// Pid of the live process, if any.
    pub pid: Option<u32>,
    /// Crashes survived so far.
    pub restarts: u32,
    /// When the current (or last) process came up.
    pub started_at: DateTime<Utc>,
}

impl WorkerMeta {
    /// Time since the current process came up.
    pub fn uptime(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }
}

struct WorkerEntry {
    meta: WorkerMeta,
    spawn: SpawnMeta,
    stop: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

type WorkerMap = Arc<RwLock<HashMap<String, WorkerEntry>>>;

/// Spawns, watches, restarts, and stops per-device worker processes.
pub struct WorkerSupervisor {
    cfg: SupervisorConfig,
    bus: Bus,
    workers: WorkerMap,
}

impl WorkerSupervisor {
    pub fn new(cfg: SupervisorConfig, bus: Bus) -> Self {
        Self {
            cfg,
            bus,
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Ensures a worker is running for `device`.
    ///
    /// No-op if one is already live (running or mid-restart). A device that
    /// exhausted its restart budget stays failed; callers must
    /// [`WorkerSupervisor::stop_worker`] (clearing the verdict) before
    /// starting it again, and get [`WorkerError::ExceededRestarts`] here
    /// otherwise.
    pub async fn start_worker(&self, device: &str, meta: SpawnMeta) -> Result<(), WorkerError> {
        let mut workers = self.workers.write().await;
        if let Some(entry) = workers.get(device) {
            return match entry.meta.state {
                WorkerState::Failed => Err(WorkerError::ExceededRestarts {
                    device: device.to_string(),
                    restarts: entry.meta.restarts,
                }),
                _ => Ok(()),
            };
        }

        self.bus
            .publish(Event::now(EventKind::WorkerStarting).with_device(device.to_string()));
        let child = spawn_child(&self.cfg, device, &meta).await?;
        let pid = child.id();
        if let Some(pid) = pid {
            self.bus.publish(
                Event::now(EventKind::WorkerStarted)
                    .with_device(device.to_string())
                    .with_pid(pid),
            );
        }

        let stop = CancellationToken::new();
        let monitor = tokio::spawn(monitor(
            Arc::clone(&self.workers),
            self.cfg.clone(),
            self.bus.clone(),
            device.to_string(),
            meta.clone(),
            stop.clone(),
            child,
        ));

        workers.insert(
            device.to_string(),
            WorkerEntry {
                meta: WorkerMeta {
                    device: device.to_string(),
                    state: WorkerState::Running,
                    pid,
                    restarts: 0,
                    started_at: Utc::now(),
                },
                spawn: meta,
                stop,
                monitor: Some(monitor),
            },
        );
        Ok(())
    }

    /// Stops the worker for `device`, waiting for its process to terminate
    /// (SIGTERM, then SIGKILL after the grace period).
    ///
    /// Unknown devices are a no-op; stopping a failed device clears its
    /// verdict so it can be started fresh.
    pub async fn stop_worker(&self, device: &str) {
        let (token, monitor) = {
            let mut workers = self.workers.write().await;
            match workers.get_mut(device) {
                Some(entry) => (entry.stop.clone(), entry.monitor.take()),
                None => return,
            }
        };

        token.cancel();
        if let Some(handle) = monitor {
            // Monitor lock acquisition never overlaps this await; it only
            // takes the map lock in short critical sections.
            let _ = handle.await;
        }
        self.workers.write().await.remove(device);
    }

    /// Stops then starts the worker, with the configured pause in between.
    /// The original spawn parameters are reused.
    pub async fn restart_worker(&self, device: &str) -> Result<(), WorkerError> {
        let meta = {
            let workers = self.workers.read().await;
            workers
                .get(device)
                .map(|e| e.spawn.clone())
                .unwrap_or_default()
        };
        self.stop_worker(device).await;
        time::sleep(self.cfg.restart_pause).await;
        self.start_worker(device, meta).await
    }

    /// Status of one worker, if tracked.
    pub async fn worker_status(&self, device: &str) -> Option<WorkerMeta> {
        self.workers
            .read()
            .await
            .get(device)
            .map(|e| e.meta.clone())
    }

    /// Status of every tracked worker.
    pub async fn all_workers(&self) -> Vec<WorkerMeta> {
        self.workers
            .read()
            .await
            .values()
            .map(|e| e.meta.clone())
            .collect()
    }

    /// Stops every tracked worker.
    pub async fn stop_all(&self) {
        let devices: Vec<String> = self.workers.read().await.keys().cloned().collect();
        for device in devices {
            self.stop_worker(&device).await;
        }
    }
}

/// Watches one worker process until it finishes for good.
async fn monitor(
    workers: WorkerMap,
    cfg: SupervisorConfig,
    bus: Bus,
    device: String,
    meta: SpawnMeta,
    token: CancellationToken,
    mut child: Child,
) {
    loop {
        let pid = child.id();
        let status = tokio::select! {
            status = child.wait() => status,
            _ = token.cancelled() => {
                terminate(&mut child, cfg.stop_grace).await;
                bus.publish(Event::now(EventKind::WorkerStopped).with_device(device.clone()));
                workers.write().await.remove(&device);
                return;
            }
        };

        let code = status.ok().and_then(|s| s.code());
        let mut exited = Event::now(EventKind::WorkerExited)
            .with_device(device.clone())
            .with_exit_code(code);
        if let Some(pid) = pid {
            exited = exited.with_pid(pid);
        }
        bus.publish(exited);

        if code == Some(0) {
            workers.write().await.remove(&device);
            return;
        }

        // Abnormal exit: charge the restart budget.
        let restarts = {
            let mut map = workers.write().await;
            let Some(entry) = map.get_mut(&device) else {
                return;
            };
            entry.meta.restarts += 1;
            entry.meta.pid = None;
            if entry.meta.restarts >= cfg.max_restarts {
                entry.meta.state = WorkerState::Failed;
                bus.publish(
                    Event::now(EventKind::WorkerGaveUp)
                        .with_device(device.clone())
                        .with_attempt(entry.meta.restarts),
                );
                return;
            }
            entry.meta.state = WorkerState::Restarting;
            entry.meta.restarts
        };

        let delay = cfg.restart_backoff.delay_for(restarts - 1);
        bus.publish(
            Event::now(EventKind::WorkerRestartScheduled)
                .with_device(device.clone())
                .with_attempt(restarts)
                .with_delay(delay),
        );

        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = token.cancelled() => {
                bus.publish(Event::now(EventKind::WorkerStopped).with_device(device.clone()));
                workers.write().await.remove(&device);
                return;
            }
        }

        bus.publish(Event::now(EventKind::WorkerStarting).with_device(device.clone()));
        match spawn_child(&cfg, &device, &meta).await {
            Ok(next) => {
                child = next;
                let pid = child.id();
                {
                    let mut map = workers.write().await;
                    if let Some(entry) = map.get_mut(&device) {
                        entry.meta.state = WorkerState::Running;
                        entry.meta.pid = pid;
                        entry.meta.started_at = Utc::now();
                    }
                }
                if let Some(pid) = pid {
                    bus.publish(
                        Event::now(EventKind::WorkerStarted)
                            .with_device(device.clone())
                            .with_pid(pid),
                    );
                }
            }
            Err(err) => {
                // The old child has already exited, so the next wait()
                // returns its cached status immediately and this crash
                // goes through the restart accounting again.
                tracing::warn!(device = %device, error = %err, "worker respawn failed");
            }
        }
    }
}

/// SIGTERM, grace period, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    if time::timeout(grace, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

/// Spawns one worker process, wiring its output into the device log file.
async fn spawn_child(
    cfg: &SupervisorConfig,
    device: &str,
    meta: &SpawnMeta,
) -> Result<Child, WorkerError> {
    tokio::fs::create_dir_all(&cfg.logs_dir)
        .await
        .map_err(|e| WorkerError::SpawnFailed {
            device: device.to_string(),
            message: format!("create {}: {e}", cfg.logs_dir.display()),
        })?;

    let mut child = Command::new(&cfg.worker_program)
        .args(&cfg.worker_args)
        .args(&meta.args)
        .arg(device)
        .envs(meta.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| WorkerError::SpawnFailed {
            device: device.to_string(),
            message: e.to_string(),
        })?;

    let log_path = cfg.logs_dir.join(format!("{device}.log"));
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pipe_to_log(stdout, log_path.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pipe_to_log(stderr, log_path));
    }
    Ok(child)
}

/// Appends one child stream to the device log until the stream closes.
async fn pipe_to_log<R>(mut src: R, path: PathBuf)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    match OpenOptions::new().create(true).append(true).open(&path).await {
        Ok(mut file) => {
            let _ = tokio::io::copy(&mut src, &mut file).await;
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot open worker log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::{BackoffPolicy, JitterPolicy};

    fn sh_config(dir: &std::path::Path, script: &str, max_restarts: u32) -> SupervisorConfig {
        SupervisorConfig {
            worker_program: "sh".to_string(),
            worker_args: vec!["-c".to_string(), script.to_string()],
            logs_dir: dir.to_path_buf(),
            max_restarts,
            restart_backoff: BackoffPolicy {
                first: Duration::from_millis(10),
                max: Duration::from_millis(10),
                factor: 1.0,
                jitter: JitterPolicy::None,
            },
            stop_grace: Duration::from_millis(200),
            restart_pause: Duration::from_millis(10),
        }
    }

    async fn wait_until<F, Fut>(mut pred: F, deadline: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let end = time::Instant::now() + deadline;
        while time::Instant::now() < end {
            if pred().await {
                return true;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn crashing_worker_exhausts_budget_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let sup = WorkerSupervisor::new(sh_config(dir.path(), "exit 3", 2), bus);

        sup.start_worker("dev-1", SpawnMeta::default()).await.unwrap();

        let failed = wait_until(
            || async {
                matches!(
                    sup.worker_status("dev-1").await,
                    Some(meta) if meta.state == WorkerState::Failed
                )
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(failed, "worker never reached Failed");

        let meta = sup.worker_status("dev-1").await.unwrap();
        assert_eq!(meta.restarts, 2);

        let mut gave_up = false;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::WorkerGaveUp {
                assert_eq!(ev.attempt, Some(2));
                gave_up = true;
            }
        }
        assert!(gave_up, "WorkerGaveUp was not published");

        // Starting a failed device is refused until it is stopped.
        let err = sup.start_worker("dev-1", SpawnMeta::default()).await.unwrap_err();
        assert!(matches!(err, WorkerError::ExceededRestarts { .. }));
        sup.stop_worker("dev-1").await;
        assert!(sup.worker_status("dev-1").await.is_none());
    }

    #[tokio::test]
    async fn clean_exit_removes_worker_without_restart() {
        let dir = tempfile::tempdir().unwrap();
        let sup = WorkerSupervisor::new(sh_config(dir.path(), "exit 0", 5), Bus::new(64));

        sup.start_worker("dev-1", SpawnMeta::default()).await.unwrap();
        let gone = wait_until(
            || async { sup.worker_status("dev-1").await.is_none() },
            Duration::from_secs(5),
        )
        .await;
        assert!(gone, "clean exit should remove the entry");
    }

    #[tokio::test]
    async fn stop_worker_terminates_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let sup = WorkerSupervisor::new(sh_config(dir.path(), "sleep 30", 5), bus);

        sup.start_worker("dev-1", SpawnMeta::default()).await.unwrap();
        time::sleep(Duration::from_millis(50)).await;

        sup.stop_worker("dev-1").await;
        assert!(sup.worker_status("dev-1").await.is_none());

        // Second stop of the same (now unknown) device is a no-op.
        sup.stop_worker("dev-1").await;

        let mut stopped = false;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::WorkerStopped {
                stopped = true;
            }
        }
        assert!(stopped, "WorkerStopped was not published");
    }

    #[tokio::test]
    async fn start_is_a_noop_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = WorkerSupervisor::new(sh_config(dir.path(), "sleep 30", 5), Bus::new(64));

        sup.start_worker("dev-1", SpawnMeta::default()).await.unwrap();
        let first_pid = sup.worker_status("dev-1").await.unwrap().pid;

        sup.start_worker("dev-1", SpawnMeta::default()).await.unwrap();
        assert_eq!(sup.worker_status("dev-1").await.unwrap().pid, first_pid);

        sup.stop_worker("dev-1").await;
    }

    #[tokio::test]
    async fn worker_output_lands_in_device_log() {
        let dir = tempfile::tempdir().unwrap();
        let sup = WorkerSupervisor::new(sh_config(dir.path(), "echo hello-log", 5), Bus::new(64));

        sup.start_worker("dev-1", SpawnMeta::default()).await.unwrap();
        let log = dir.path().join("dev-1.log");

        let written = wait_until(
            || async {
                tokio::fs::read_to_string(&log)
                    .await
                    .map(|s| s.contains("hello-log"))
                    .unwrap_or(false)
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(written, "worker stdout never reached the log file");
    }

    #[tokio::test]
    async fn spawn_meta_args_and_env_reach_the_process() {
        let dir = tempfile::tempdir().unwrap();
        // sh -c '<script>' <meta-arg> <device>: the meta arg lands in $0.
        let sup = WorkerSupervisor::new(
            sh_config(dir.path(), "echo arg=$0 env=$FLEET_PROFILE", 5),
            Bus::new(64),
        );

        let meta = SpawnMeta {
            args: vec!["profile-7".to_string()],
            env: vec![("FLEET_PROFILE".to_string(), "stealth".to_string())],
        };
        sup.start_worker("dev-1", meta).await.unwrap();

        let log = dir.path().join("dev-1.log");
        let written = wait_until(
            || async {
                tokio::fs::read_to_string(&log)
                    .await
                    .map(|s| s.contains("arg=profile-7 env=stealth"))
                    .unwrap_or(false)
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(written, "spawn meta did not reach the worker");
    }

    #[tokio::test]
    async fn restart_worker_spawns_a_fresh_process() {
        let dir = tempfile::tempdir().unwrap();
        let sup = WorkerSupervisor::new(sh_config(dir.path(), "sleep 30", 5), Bus::new(64));

        sup.start_worker("dev-1", SpawnMeta::default()).await.unwrap();
        let first_pid = sup.worker_status("dev-1").await.unwrap().pid;

        sup.restart_worker("dev-1").await.unwrap();
        let meta = sup.worker_status("dev-1").await.unwrap();
        assert_eq!(meta.state, WorkerState::Running);
        assert_ne!(meta.pid, first_pid);
        assert_eq!(meta.restarts, 0, "deliberate restart resets the budget");

        sup.stop_worker("dev-1").await;
    }
}
