//! Stored idempotency records and admission outcomes.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::IdempotencyKey;

/// Membership row proving a request key has been admitted once.
///
/// Records are insert-only; nothing in this service updates or expires them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// Surrogate primary key.
    pub id: Uuid,
    pub key: IdempotencyKey,
    /// When the key was first admitted.
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Record for `key` admitted at `now`.
    pub fn admitted(key: IdempotencyKey, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            created_at: now,
        }
    }
}

/// Result of an atomic check-and-insert against the key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyAdmission {
    /// The key was new and is now recorded; the caller may proceed.
    Admitted,
    /// The key was already present; the request is a duplicate.
    Duplicate,
}

impl IdempotencyAdmission {
    /// Whether the request may run.
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}
