//! Event subscribers: the fire-and-forget observability path.
//!
//! ## Contents
//! - [`Subscribe`] — trait for custom event handlers
//! - [`SubscriberSet`] — bounded, panic-isolated fan-out of bus events
//! - [`LogWriter`] — built-in subscriber that renders events via `tracing`
//!
//! Publishers never wait on subscribers: the set uses `try_send` into
//! per-subscriber bounded queues and drops (with accounting) on overflow.

mod log;
mod subscribe;
mod subscriber_set;

pub use self::log::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_set::SubscriberSet;
