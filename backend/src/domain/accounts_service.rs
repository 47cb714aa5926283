//! Account use cases behind the RPC surface.
//!
//! Every user store call goes through the circuit breaker. Client outcomes
//! (validation, not found, duplicates) are decided outside the breaker or
//! returned by the store as `Ok` values, so only infrastructure faults count
//! towards opening it.

use std::sync::Arc;

use tracing::{error, info};

use crate::domain::Error;
use crate::domain::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::domain::outbox::EventId;
use crate::domain::ports::{
    CreateUserOutcome, SoftDeleteOutcome, UserPersistenceError, UserRepository,
};
use crate::domain::user::{NewUser, User, UserId, UserValidationError};

/// Result of a successful delete: the saga has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedUser {
    pub user_id: UserId,
    /// Outbox event announcing the deletion.
    pub event_id: EventId,
}

pub struct AccountsService {
    users: Arc<dyn UserRepository>,
    breaker: Arc<CircuitBreaker>,
}

impl AccountsService {
    pub fn new(users: Arc<dyn UserRepository>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { users, breaker }
    }

    /// Register a new user.
    pub async fn register_user(&self, username: &str, email: &str) -> Result<User, Error> {
        let new_user = NewUser::try_from_strings(username, email).map_err(map_validation)?;

        let outcome = self
            .breaker
            .call(self.users.create(&new_user))
            .await
            .map_err(map_breaker_error)?;

        match outcome {
            CreateUserOutcome::Created(user) => {
                info!(user_id = %user.id, "user registered");
                Ok(user)
            }
            CreateUserOutcome::UsernameTaken => Err(Error::conflict(format!(
                "username {} is already taken",
                new_user.username
            ))),
            CreateUserOutcome::EmailTaken => Err(Error::conflict(format!(
                "email {} is already registered",
                new_user.email
            ))),
        }
    }

    /// Fetch an active user.
    pub async fn get_user(&self, user_id: &str) -> Result<User, Error> {
        let id = UserId::new(user_id).map_err(map_validation)?;

        self.breaker
            .call(self.users.find(&id))
            .await
            .map_err(map_breaker_error)?
            .ok_or_else(|| Error::not_found(format!("user {id} not found")))
    }

    /// Soft-delete a user and start the deletion saga.
    ///
    /// The delete flag and the `user-deleted` outbox event are committed
    /// together; if either fails, neither is visible.
    pub async fn delete_user(&self, user_id: &str) -> Result<DeletedUser, Error> {
        let id = UserId::new(user_id).map_err(map_validation)?;
        let event_id = EventId::random();

        let outcome = self
            .breaker
            .call(self.users.soft_delete(&id, event_id))
            .await
            .map_err(map_breaker_error)?;

        match outcome {
            SoftDeleteOutcome::Deleted { snapshot, event_id } => {
                info!(user_id = %snapshot.id, %event_id, "user deleted; saga started");
                Ok(DeletedUser {
                    user_id: snapshot.id,
                    event_id,
                })
            }
            SoftDeleteOutcome::NotFound => Err(Error::not_found(format!("user {id} not found"))),
            SoftDeleteOutcome::AlreadyDeleted => {
                Err(Error::not_found(format!("user {id} is already deleted")))
            }
        }
    }
}

fn map_validation(err: UserValidationError) -> Error {
    Error::invalid_request(err.to_string())
}

fn map_breaker_error(err: BreakerError<UserPersistenceError>) -> Error {
    match err {
        BreakerError::Open { name } => {
            Error::service_unavailable(format!("{name} is temporarily unavailable"))
        }
        BreakerError::Inner(err) => {
            error!(error = %err, "user store failed");
            Error::internal(err.to_string())
        }
    }
}
