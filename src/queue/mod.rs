//! # Task queue: per-device FIFO work store with exclusive claiming.
//!
//! ## Contents
//! - [`Task`], [`TaskKind`], [`TaskStatus`] — serializable task records
//! - [`TaskQueue`] — enqueue, claim, complete/fail, introspect, clean up
//! - [`QueueStats`] — store-wide counters
//!
//! Workers never touch the store directly; they poll through the
//! [`TaskSource`](crate::worker::TaskSource) seam, which [`TaskQueue`]
//! implements.

mod queue;
mod task;

pub use queue::{QueueStats, TaskQueue};
pub use task::{Task, TaskKind, TaskStatus};
