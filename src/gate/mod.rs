//! # Concurrency gates: FIFO-admitted caps on resource-heavy operations.
//!
//! ## Contents
//! - [`Gate`] — one named cap with FIFO admission, RAII slot release,
//!   staggered batch starts, and queue flushing
//! - [`GateSet`] — the standard launch/script pair with quiescence waiting
//! - [`GateStatus`], [`GateSetStatus`] — introspection snapshots
//!
//! ## Flow
//! ```text
//! run(id, fut)
//!   ├─► slot free & queue empty ──► run fut, release slot on drop
//!   └─► otherwise ──► park in FIFO queue (GateQueued published)
//!         ├─► granted by a release ──► run fut
//!         └─► clear_queue() ──► Err(QueueCleared)
//! ```

mod gate;
mod set;

pub use gate::{BatchResult, Gate, GateStatus};
pub use set::{GateSet, GateSetStatus};
