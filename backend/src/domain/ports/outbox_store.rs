//! Port abstraction for outbox persistence.
//!
//! Appending happens inside the business transaction and is therefore an
//! adapter-level operation (see the Diesel outbox store). This port covers
//! the lifecycle operations used by the dispatcher and compensation handler.

use async_trait::async_trait;

use crate::domain::outbox::{EventId, FinalStatus, FinalizeOutcome, OutboxEvent, OutboxStatus};

use super::define_port_error;

define_port_error! {
    /// Errors raised by outbox store adapters.
    pub enum OutboxStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "outbox store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "outbox store query failed: {message}",
        /// A stored row could not be decoded into a domain event.
        Serialization { message: String } => "outbox store serialization failed: {message}",
    }
}

/// Port for reading and advancing outbox events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Return up to `limit` events in `status`, oldest first.
    async fn list_pending(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError>;

    /// Move the given events from `waiting` to `sent`.
    ///
    /// Only rows still waiting are touched. Returns the number of rows moved.
    async fn mark_sent(&self, ids: &[EventId]) -> Result<usize, OutboxStoreError>;

    /// Move a sent event to its terminal status.
    ///
    /// Terminal events are left untouched and reported as
    /// [`FinalizeOutcome::AlreadyFinal`].
    async fn mark_final(
        &self,
        id: EventId,
        status: FinalStatus,
    ) -> Result<FinalizeOutcome, OutboxStoreError>;

    /// Load a single event by id.
    async fn find(&self, id: EventId) -> Result<Option<OutboxEvent>, OutboxStoreError>;

    /// Increment the retry counter of events that are still waiting.
    async fn record_publish_failures(&self, ids: &[EventId]) -> Result<usize, OutboxStoreError>;
}
