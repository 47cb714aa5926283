//! PostgreSQL-backed `OutboxStore` implementation using Diesel ORM.
//!
//! Rows are appended by [`append`] inside the caller's business transaction;
//! the store itself only moves rows forward through
//! `waiting -> sent -> success | error`. Every status update is guarded by
//! the expected current status, so concurrent writers cannot move a row
//! backwards.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::debug;

use crate::domain::outbox::{
    EventId, FinalStatus, FinalizeOutcome, NewOutboxEvent, OutboxEvent, OutboxStatus,
};
use crate::domain::ports::{OutboxStore, OutboxStoreError};

use super::diesel_helpers::{cast_count, map_diesel_error, map_pool_error};
use super::models::{NewOutboxEventRow, OutboxEventRow};
use super::pool::{DbPool, PoolError};
use super::schema::outbox_events;

/// Insert a `waiting` outbox row on an existing connection.
///
/// Call inside the transaction that performs the business write so both
/// commit or roll back together.
pub async fn append(
    conn: &mut AsyncPgConnection,
    event: &NewOutboxEvent,
) -> Result<(), diesel::result::Error> {
    let row = NewOutboxEventRow {
        event_id: *event.event_id.as_uuid(),
        event_type: &event.event_type,
        payload: &event.payload,
    };

    diesel::insert_into(outbox_events::table)
        .values(&row)
        .execute(conn)
        .await?;
    debug!(event_id = %event.event_id, event_type = %event.event_type, "outbox event appended");
    Ok(())
}

/// Diesel-backed implementation of the `OutboxStore` port.
#[derive(Clone)]
pub struct DieselOutboxStore {
    pool: DbPool,
}

impl DieselOutboxStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn pool_error(error: PoolError) -> OutboxStoreError {
    map_pool_error(error, OutboxStoreError::connection)
}

fn diesel_error(error: diesel::result::Error) -> OutboxStoreError {
    map_diesel_error(error, OutboxStoreError::query, OutboxStoreError::connection)
}

fn row_to_event(row: OutboxEventRow) -> Result<OutboxEvent, OutboxStoreError> {
    let status = row
        .status
        .parse::<OutboxStatus>()
        .map_err(|err| OutboxStoreError::serialization(err.to_string()))?;

    Ok(OutboxEvent {
        event_id: EventId::from_uuid(row.event_id),
        event_type: row.event_type,
        payload: row.payload,
        status,
        retry_count: cast_count(row.retry_count),
        created_at: row.created_at,
    })
}

fn event_uuids(ids: &[EventId]) -> Vec<uuid::Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}

#[async_trait]
impl OutboxStore for DieselOutboxStore {
    async fn list_pending(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<OutboxEventRow> = outbox_events::table
            .filter(outbox_events::status.eq(status.as_str()))
            .order(outbox_events::position.asc())
            .limit(limit)
            .select(OutboxEventRow::as_select())
            .load(&mut conn)
            .await
            .map_err(diesel_error)?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn mark_sent(&self, ids: &[EventId]) -> Result<usize, OutboxStoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        diesel::update(
            outbox_events::table
                .filter(outbox_events::event_id.eq_any(event_uuids(ids)))
                .filter(outbox_events::status.eq(OutboxStatus::Waiting.as_str())),
        )
        .set((
            outbox_events::status.eq(OutboxStatus::Sent.as_str()),
            outbox_events::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await
        .map_err(diesel_error)
    }

    async fn mark_final(
        &self,
        id: EventId,
        status: FinalStatus,
    ) -> Result<FinalizeOutcome, OutboxStoreError> {
        let target: OutboxStatus = status.into();
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let updated = diesel::update(
            outbox_events::table
                .filter(outbox_events::event_id.eq(id.as_uuid()))
                .filter(outbox_events::status.eq(OutboxStatus::Sent.as_str())),
        )
        .set((
            outbox_events::status.eq(target.as_str()),
            outbox_events::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await
        .map_err(diesel_error)?;

        if updated == 1 {
            return Ok(FinalizeOutcome::Finalized);
        }

        // Nothing moved: read the row to tell the caller why.
        let current: Option<String> = outbox_events::table
            .filter(outbox_events::event_id.eq(id.as_uuid()))
            .select(outbox_events::status)
            .first(&mut conn)
            .await
            .optional()
            .map_err(diesel_error)?;

        let Some(current) = current else {
            return Ok(FinalizeOutcome::NotFound);
        };
        let current = current
            .parse::<OutboxStatus>()
            .map_err(|err| OutboxStoreError::serialization(err.to_string()))?;

        Ok(if current.is_terminal() {
            FinalizeOutcome::AlreadyFinal(current)
        } else {
            FinalizeOutcome::NotSent
        })
    }

    async fn find(&self, id: EventId) -> Result<Option<OutboxEvent>, OutboxStoreError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let row: Option<OutboxEventRow> = outbox_events::table
            .filter(outbox_events::event_id.eq(id.as_uuid()))
            .select(OutboxEventRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(diesel_error)?;

        row.map(row_to_event).transpose()
    }

    async fn record_publish_failures(&self, ids: &[EventId]) -> Result<usize, OutboxStoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        diesel::update(
            outbox_events::table
                .filter(outbox_events::event_id.eq_any(event_uuids(ids)))
                .filter(outbox_events::status.eq(OutboxStatus::Waiting.as_str())),
        )
        .set((
            outbox_events::retry_count.eq(outbox_events::retry_count + 1),
            outbox_events::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await
        .map_err(diesel_error)
    }
}
