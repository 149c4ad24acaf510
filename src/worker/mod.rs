//! # Worker layer: per-device processes and the loop they run.
//!
//! ## Contents
//! - [`WorkerSupervisor`] — spawns one external worker process per device,
//!   restarts crashes under a budget, stops gracefully
//! - [`WorkerRunner`] — the poll loop inside a worker process
//! - [`TaskSource`], [`AutomationService`] — the two seams a runner talks
//!   through; [`BridgeAutomation`] is the production automation
//! - [`WorkerMeta`], [`WorkerState`] — supervisor status surface
//!
//! ## Split
//! The supervisor lives in the controlling process and only knows about
//! processes; the runner lives in the worker process and only knows about
//! tasks. They meet at the task store, not in memory.

mod automation;
mod runner;
mod supervisor;

pub use automation::{AutomationService, BridgeAutomation, TaskSource};
pub use runner::WorkerRunner;
pub use supervisor::{SpawnMeta, WorkerMeta, WorkerState, WorkerSupervisor};
