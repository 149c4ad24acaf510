//! # fleetvisor
//!
//! **Fleetvisor** is a concurrency-controlled runtime for driving a fleet of
//! locally emulated mobile devices through an external command-line bridge
//! tool.
//!
//! It provides the four pieces such a fleet needs: a connection pool that
//! resolves device references to healthy bridge sessions, concurrency gates
//! that keep resource-heavy operations from stampeding the host, a task
//! queue with exclusive claiming, and a supervisor that keeps one worker
//! process alive per device.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  callers                         workers (one process per device)
//!     │ add_task / execute              │ poll loop (WorkerRunner)
//!     ▼                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  TaskQueue (per-device FIFO, exclusive claiming)                │
//! └──────┬──────────────────────────────────────────────────────────┘
//!        │ TaskSource seam
//!        ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  AutomationService (BridgeAutomation)                           │
//! │    RunScript ─► script Gate ─► ConnectionPool                   │
//! │    others    ──────────────► ConnectionPool                     │
//! └──────┬──────────────────────────────────────────────────────────┘
//!        ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ConnectionPool                                                 │
//! │  - serial cache (TTL)     - health records (freshness window)   │
//! │  - in-flight de-dup       - single offline retry                │
//! └──────┬──────────────────────────────────────────────────────────┘
//!        ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Bridge (ShellBridge → external CLI tool, one proc per command) │
//! └─────────────────────────────────────────────────────────────────┘
//!
//!  WorkerSupervisor ──► spawns/restarts/stops the worker processes
//!  Bus (broadcast)  ──► every component publishes Events
//!  SubscriberSet    ──► fans events out to isolated subscribers
//! ```
//!
//! ### Worker lifecycle
//! ```text
//! start_worker(dev) ──► spawn process ──► monitor
//!
//! loop {
//!   ├─► child exits 0        ─► entry removed, done
//!   ├─► child crashes        ─► restarts += 1
//!   │     ├─ budget left     ─► cool-down (BackoffPolicy), respawn
//!   │     └─ budget spent    ─► state = Failed, WorkerGaveUp
//!   └─► stop requested       ─► SIGTERM ─► grace ─► SIGKILL, removed
//! }
//! ```
//!
//! ## Features
//! | Area            | Description                                               | Key types / traits                        |
//! |-----------------|-----------------------------------------------------------|-------------------------------------------|
//! | **Pool**        | Device resolution, health, de-dup, retry, timeouts.       | [`ConnectionPool`], [`DeviceRef`]         |
//! | **Gates**       | FIFO-admitted caps on launches and script runs.           | [`Gate`], [`GateSet`]                     |
//! | **Queue**       | Per-device FIFO tasks with exclusive claiming.            | [`TaskQueue`], [`Task`], [`TaskKind`]     |
//! | **Workers**     | Per-device processes, restart budget, poll loop.          | [`WorkerSupervisor`], [`WorkerRunner`]    |
//! | **Bridge**      | Seam to the external CLI tool.                            | [`Bridge`], [`ShellBridge`]               |
//! | **Events**      | Broadcast lifecycle events with global ordering.          | [`Bus`], [`Event`], [`Subscribe`]         |
//! | **Policies**    | Cool-down/backoff with optional jitter.                   | [`BackoffPolicy`], [`JitterPolicy`]       |
//! | **Errors**      | Typed errors per concern, stable labels.                  | [`PoolError`], [`GateError`]              |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use fleetvisor::{
//!     Bus, Config, ConnectionPool, DeviceRef, ExecOptions, GateSet, ShellBridge,
//!     SpawnMeta, TaskKind, TaskQueue, WorkerSupervisor,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::default();
//!     let bus = Bus::new(cfg.bus_capacity_clamped());
//!
//!     let pool = ConnectionPool::new(
//!         Arc::new(ShellBridge::new("adb")),
//!         cfg.pool.clone(),
//!         bus.clone(),
//!     );
//!     let gates = Arc::new(GateSet::new(&cfg.gates, bus.clone()));
//!     let queue = Arc::new(TaskQueue::new(bus.clone()));
//!     let supervisor = WorkerSupervisor::new(cfg.supervisor.clone(), bus.clone());
//!
//!     let device = DeviceRef::Port(5554);
//!
//!     // Boot the device's worker and hand it some work.
//!     supervisor.start_worker(&device.to_string(), SpawnMeta::default()).await?;
//!     queue
//!         .add_task(&device.to_string(), TaskKind::Shell {
//!             command: "input keyevent 26".into(),
//!         })
//!         .await;
//!
//!     // Or talk to the device directly, through the pool.
//!     let out = gates
//!         .script()
//!         .run("unlock", pool.execute(&device, "shell wm size", ExecOptions::default()))
//!         .await??;
//!     println!("{out}");
//!     Ok(())
//! }
//! ```

mod bridge;
mod config;
mod error;
mod events;
mod gate;
mod policies;
mod pool;
mod queue;
mod subscribers;
mod worker;

// ---- Public re-exports ----

pub use bridge::{Bridge, BridgeOutput, DeviceEntry, ShellBridge};
pub use config::{Config, GateConfig, PoolConfig, QueueConfig, RunnerConfig, SupervisorConfig};
pub use error::{AutomationError, BridgeError, GateError, PoolError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use gate::{BatchResult, Gate, GateSet, GateSetStatus, GateStatus};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use pool::{ConnectionPool, DeviceRef, ExecOptions, PoolStats};
pub use queue::{QueueStats, Task, TaskKind, TaskQueue, TaskStatus};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use worker::{
    AutomationService, BridgeAutomation, SpawnMeta, TaskSource, WorkerMeta, WorkerRunner,
    WorkerState, WorkerSupervisor,
};
