//! PostgreSQL-backed `UserRepository` implementation using Diesel ORM.
//!
//! Soft deletion and the `user-deleted` outbox append share one transaction:
//! either the flag flips and the event is recorded, or neither happens.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::{debug, info};

use crate::domain::outbox::{EventId, NewOutboxEvent};
use crate::domain::ports::{
    CreateUserOutcome, RestoreOutcome, SoftDeleteOutcome, UserPersistenceError, UserRepository,
};
use crate::domain::user::{Email, NewUser, User, UserId, Username};

use super::diesel_helpers::{map_diesel_error, map_pool_error, unique_violation};
use super::diesel_outbox_store::append;
use super::models::{NewUserRow, UserRow};
use super::pool::{DbPool, PoolError};
use super::schema::users;

/// Diesel-backed implementation of the `UserRepository` port.
#[derive(Clone)]
pub struct DieselUserRepository {
    pool: DbPool,
}

impl DieselUserRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Failure inside the soft-delete transaction; either aborts the commit.
#[derive(Debug, thiserror::Error)]
enum SoftDeleteTxError {
    #[error(transparent)]
    Diesel(#[from] diesel::result::Error),
    #[error("{0}")]
    Serialization(String),
}

fn pool_error(error: PoolError) -> UserPersistenceError {
    map_pool_error(error, UserPersistenceError::connection)
}

fn diesel_error(error: diesel::result::Error) -> UserPersistenceError {
    map_diesel_error(
        error,
        UserPersistenceError::query,
        UserPersistenceError::connection,
    )
}

fn row_to_user(row: UserRow) -> Result<User, UserPersistenceError> {
    let corrupted =
        |err: crate::domain::UserValidationError| UserPersistenceError::serialization(err.to_string());

    Ok(User {
        id: UserId::from_uuid(row.id),
        username: Username::new(row.username).map_err(corrupted)?,
        email: Email::new(row.email).map_err(corrupted)?,
        deleted: row.deleted,
        created_at: row.created_at,
    })
}

/// Classify a unique violation on insert by the constraint it hit.
fn taken_outcome(constraint: &str) -> Option<CreateUserOutcome> {
    if constraint.contains("username") {
        Some(CreateUserOutcome::UsernameTaken)
    } else if constraint.contains("email") {
        Some(CreateUserOutcome::EmailTaken)
    } else {
        None
    }
}

#[async_trait]
impl UserRepository for DieselUserRepository {
    async fn create(&self, user: &NewUser) -> Result<CreateUserOutcome, UserPersistenceError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let row = NewUserRow {
            id: *user.id.as_uuid(),
            username: user.username.as_ref(),
            email: user.email.as_ref(),
        };

        let inserted = diesel::insert_into(users::table)
            .values(&row)
            .returning(UserRow::as_returning())
            .get_result(&mut conn)
            .await;

        match inserted {
            Ok(row) => row_to_user(row).map(CreateUserOutcome::Created),
            Err(err) => match unique_violation(&err).and_then(taken_outcome) {
                Some(outcome) => {
                    debug!(?outcome, "registration rejected by unique constraint");
                    Ok(outcome)
                }
                None => Err(diesel_error(err)),
            },
        }
    }

    async fn find(&self, id: &UserId) -> Result<Option<User>, UserPersistenceError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let row: Option<UserRow> = users::table
            .filter(users::id.eq(id.as_uuid()))
            .filter(users::deleted.eq(false))
            .select(UserRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(diesel_error)?;

        row.map(row_to_user).transpose()
    }

    async fn soft_delete(
        &self,
        id: &UserId,
        event_id: EventId,
    ) -> Result<SoftDeleteOutcome, UserPersistenceError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let user_uuid = *id.as_uuid();

        let outcome = conn
            .transaction::<_, SoftDeleteTxError, _>(|conn| {
                async move {
                    let row: Option<UserRow> = users::table
                        .filter(users::id.eq(user_uuid))
                        .select(UserRow::as_select())
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(row) = row else {
                        return Ok(SoftDeleteOutcome::NotFound);
                    };
                    if row.deleted {
                        return Ok(SoftDeleteOutcome::AlreadyDeleted);
                    }

                    let snapshot = row_to_user(row)
                        .map_err(|err| SoftDeleteTxError::Serialization(err.to_string()))?
                        .snapshot();
                    let event = NewOutboxEvent::user_deleted(event_id, &snapshot)
                        .map_err(|err| SoftDeleteTxError::Serialization(err.to_string()))?;

                    diesel::update(users::table.filter(users::id.eq(user_uuid)))
                        .set((users::deleted.eq(true), users::updated_at.eq(Utc::now())))
                        .execute(conn)
                        .await?;
                    append(conn, &event).await?;

                    Ok(SoftDeleteOutcome::Deleted { snapshot, event_id })
                }
                .scope_boxed()
            })
            .await
            .map_err(|err| match err {
                SoftDeleteTxError::Diesel(err) => diesel_error(err),
                SoftDeleteTxError::Serialization(message) => {
                    UserPersistenceError::serialization(message)
                }
            })?;

        if matches!(outcome, SoftDeleteOutcome::Deleted { .. }) {
            info!(user_id = %id, event_id = %event_id, "user soft-deleted");
        }
        Ok(outcome)
    }

    async fn restore(&self, id: &UserId) -> Result<RestoreOutcome, UserPersistenceError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let restored = diesel::update(
            users::table
                .filter(users::id.eq(id.as_uuid()))
                .filter(users::deleted.eq(true)),
        )
        .set((users::deleted.eq(false), users::updated_at.eq(Utc::now())))
        .execute(&mut conn)
        .await
        .map_err(diesel_error)?;

        if restored == 1 {
            info!(user_id = %id, "user restored");
            return Ok(RestoreOutcome::Restored);
        }

        let exists: i64 = users::table
            .filter(users::id.eq(id.as_uuid()))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(diesel_error)?;

        Ok(if exists == 0 {
            RestoreOutcome::NotFound
        } else {
            RestoreOutcome::AlreadyActive
        })
    }
}
