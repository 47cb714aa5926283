//! Transactional outbox entries.
//!
//! An [`OutboxEvent`] is written in the same database transaction as the
//! business change it announces. The dispatcher later moves it from
//! `waiting` to `sent`, and downstream feedback finalizes it as `success` or
//! `error`. Terminal rows are kept for auditing and never revisited.

mod status;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::user::UserSnapshot;

pub use status::{FinalStatus, OutboxStatus, ParseOutboxStatusError};

/// Event type and stream name for user deletions.
pub const USER_DELETED_EVENT: &str = "user-deleted";

/// Logical exchange that user lifecycle events are published under.
pub const USER_LIFECYCLE_EXCHANGE: &str = "user-lifecycle";

/// Identifier of an outbox event, shared with downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a fresh identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Persisted outbox row.
///
/// ## Invariants
/// - `status` only moves `waiting -> sent -> success | error`.
/// - `retry_count` is informational; it never gates delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Event to append inside a business transaction. Always starts `waiting`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub payload: Vec<u8>,
}

impl NewOutboxEvent {
    /// Build the `user-deleted` event carrying the deleted user's snapshot.
    pub fn user_deleted(
        event_id: EventId,
        snapshot: &UserSnapshot,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id,
            event_type: USER_DELETED_EVENT.to_owned(),
            payload: snapshot.to_payload()?,
        })
    }
}

/// Result of finalizing an event from downstream feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The event moved from `sent` to the requested terminal status.
    Finalized,
    /// The event was already terminal; nothing changed.
    AlreadyFinal(OutboxStatus),
    /// The event exists but has not been marked sent yet.
    NotSent,
    /// No event with this id exists.
    NotFound,
}

#[cfg(test)]
mod tests;
