//! Port abstraction for publishing outbox events to the message bus.

use async_trait::async_trait;

use crate::domain::outbox::OutboxEvent;

use super::define_port_error;

define_port_error! {
    /// Errors raised by event publisher adapters.
    pub enum EventPublisherError {
        /// Broker connection could not be established.
        Connection { message: String } => "event publisher connection failed: {message}",
        /// The broker rejected or failed the publish.
        Publish { message: String } => "event publish failed: {message}",
        /// The publish did not complete before its deadline.
        Timeout { millis: u64 } => "event publish timed out after {millis}ms",
    }
}

/// Port for delivering an outbox event to downstream consumers.
///
/// Delivery is at least once; consumers deduplicate by event id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `event` to the channel named by its event type.
    async fn publish(&self, event: &OutboxEvent) -> Result<(), EventPublisherError>;
}
