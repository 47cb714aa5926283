//! Port abstraction for user persistence adapters and their errors.
//!
//! Client-facing outcomes (duplicate names, missing users) are returned as
//! `Ok` variants so callers can tell them apart from infrastructure faults.

use async_trait::async_trait;

use crate::domain::outbox::EventId;
use crate::domain::user::{NewUser, User, UserId, UserSnapshot};

use super::define_port_error;

define_port_error! {
    /// Persistence errors raised by user repository adapters.
    pub enum UserPersistenceError {
        /// Repository connection could not be established.
        Connection { message: String } => "user repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "user repository query failed: {message}",
        /// A stored row or event payload could not be encoded or decoded.
        Serialization { message: String } => "user repository serialization failed: {message}",
    }
}

/// Outcome of registering a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateUserOutcome {
    Created(User),
    UsernameTaken,
    EmailTaken,
}

/// Outcome of the soft delete that starts the deletion saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftDeleteOutcome {
    /// The user was flagged deleted and a `user-deleted` event was appended in
    /// the same transaction.
    Deleted {
        snapshot: UserSnapshot,
        event_id: EventId,
    },
    NotFound,
    AlreadyDeleted,
}

/// Outcome of undoing a soft delete during compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    AlreadyActive,
    NotFound,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user.
    async fn create(&self, user: &NewUser) -> Result<CreateUserOutcome, UserPersistenceError>;

    /// Fetch an active (not deleted) user by identifier.
    async fn find(&self, id: &UserId) -> Result<Option<User>, UserPersistenceError>;

    /// Flag the user deleted and append the `user-deleted` outbox event with
    /// id `event_id`, atomically.
    async fn soft_delete(
        &self,
        id: &UserId,
        event_id: EventId,
    ) -> Result<SoftDeleteOutcome, UserPersistenceError>;

    /// Clear the deleted flag.
    async fn restore(&self, id: &UserId) -> Result<RestoreOutcome, UserPersistenceError>;
}
