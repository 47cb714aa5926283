//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::idempotency::IdempotencyRecord;

use super::schema::{idempotency_keys, outbox_events, users};

/// Row struct for reading from the users table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Insertable struct for registering users.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub(crate) struct NewUserRow<'a> {
    pub id: Uuid,
    pub username: &'a str,
    pub email: &'a str,
}

// ---------------------------------------------------------------------------
// Outbox models
// ---------------------------------------------------------------------------

/// Row struct for reading from the outbox_events table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct OutboxEventRow {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub status: String,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Insertable struct for appending outbox events.
///
/// `status`, `retry_count` and `position` take their column defaults.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = outbox_events)]
pub(crate) struct NewOutboxEventRow<'a> {
    pub event_id: Uuid,
    pub event_type: &'a str,
    pub payload: &'a [u8],
}

// ---------------------------------------------------------------------------
// Idempotency key models
// ---------------------------------------------------------------------------

/// Insertable struct for admitting idempotency keys.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = idempotency_keys)]
pub(crate) struct NewIdempotencyKeyRow {
    pub id: Uuid,
    pub idempotency_key: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<&IdempotencyRecord> for NewIdempotencyKeyRow {
    fn from(record: &IdempotencyRecord) -> Self {
        Self {
            id: record.id,
            idempotency_key: *record.key.as_uuid(),
            created_at: record.created_at,
        }
    }
}
