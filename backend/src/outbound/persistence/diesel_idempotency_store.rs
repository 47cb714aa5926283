//! PostgreSQL-backed `IdempotencyStore` implementation using Diesel ORM.
//!
//! Admission is a single `INSERT .. ON CONFLICT DO NOTHING` against the unique
//! `idempotency_key` column; one affected row means this request won. There is
//! no separate lookup, so two concurrent duplicates cannot both be admitted.

use async_trait::async_trait;
use chrono::Utc;
use diesel_async::RunQueryDsl;
use tracing::debug;

use crate::domain::idempotency::{IdempotencyAdmission, IdempotencyKey, IdempotencyRecord};
use crate::domain::ports::{IdempotencyStore, IdempotencyStoreError};

use super::diesel_helpers::{map_diesel_error, map_pool_error};
use super::models::NewIdempotencyKeyRow;
use super::pool::DbPool;
use super::schema::idempotency_keys;

/// Diesel-backed implementation of the `IdempotencyStore` port.
#[derive(Clone)]
pub struct DieselIdempotencyStore {
    pool: DbPool,
}

impl DieselIdempotencyStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn admission(rows_affected: usize) -> IdempotencyAdmission {
    if rows_affected == 0 {
        IdempotencyAdmission::Duplicate
    } else {
        IdempotencyAdmission::Admitted
    }
}

#[async_trait]
impl IdempotencyStore for DieselIdempotencyStore {
    async fn insert_if_absent(
        &self,
        key: &IdempotencyKey,
    ) -> Result<IdempotencyAdmission, IdempotencyStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| map_pool_error(err, IdempotencyStoreError::connection))?;

        let record = IdempotencyRecord::admitted(*key, Utc::now());
        let row = NewIdempotencyKeyRow::from(&record);

        let inserted = diesel::insert_into(idempotency_keys::table)
            .values(&row)
            .on_conflict(idempotency_keys::idempotency_key)
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(|err| {
                map_diesel_error(
                    err,
                    IdempotencyStoreError::query,
                    IdempotencyStoreError::connection,
                )
            })?;

        let outcome = admission(inserted);
        debug!(key = %key, admitted = outcome.is_admitted(), "idempotency key checked");
        Ok(outcome)
    }
}
