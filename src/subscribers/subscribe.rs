//! # Subscriber contract.
//!
//! [`Subscribe`] is how external code observes the runtime: loggers,
//! metrics exporters, alerting hooks. Implementations are driven by a
//! dedicated worker loop behind a bounded queue, so a slow subscriber
//! delays nobody — it only risks dropping its own events.

use crate::events::Event;
use async_trait::async_trait;

/// An event consumer attached to the runtime.
///
/// Runs on its own worker task; blocking the async runtime here stalls only
/// this subscriber's queue.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Process one event.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic accounting.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Depth of this subscriber's queue; events beyond it are dropped (and
    /// counted via `SubscriberOverflow`).
    fn queue_capacity(&self) -> usize {
        256
    }
}
