//! Port abstraction for idempotency key persistence.
//!
//! The [`IdempotencyStore`] trait records which request keys have already
//! been admitted. Adapters must make the check and the insert a single atomic
//! step so concurrent duplicates cannot both be admitted.

use async_trait::async_trait;

use crate::domain::idempotency::{IdempotencyAdmission, IdempotencyKey};

use super::define_port_error;

define_port_error! {
    /// Errors raised by idempotency store adapters.
    pub enum IdempotencyStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "idempotency store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "idempotency store query failed: {message}",
    }
}

/// Port for idempotency key storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Record `key` if it has not been seen before.
    ///
    /// Returns [`IdempotencyAdmission::Admitted`] for the first caller and
    /// [`IdempotencyAdmission::Duplicate`] for every later one.
    async fn insert_if_absent(
        &self,
        key: &IdempotencyKey,
    ) -> Result<IdempotencyAdmission, IdempotencyStoreError>;
}
