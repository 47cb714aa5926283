//! Admission guard for non-idempotent RPCs.
//!
//! The guard records the request key with one atomic check-and-insert before
//! the handler runs. A duplicate key is rejected as a conflict and the handler
//! is never invoked.
//!
//! Admission is not completion: if the process dies after the key is stored
//! but before the handler finishes, a client retry with the same key is still
//! rejected.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error};

use crate::domain::Error;
use crate::domain::idempotency::{IdempotencyAdmission, IdempotencyKey};
use crate::domain::ports::{IdempotencyStore, IdempotencyStoreError};

/// Runs handlers at most once per [`IdempotencyKey`].
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self { store }
    }

    /// Record `key` and, if it is new, run `handler`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::domain::ErrorCode::Conflict`] error when the key was
    /// already admitted, an internal error when the store fails, and otherwise
    /// whatever `handler` returns.
    pub async fn admit_then<T, F, Fut>(&self, key: &IdempotencyKey, handler: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let admission = self
            .store
            .insert_if_absent(key)
            .await
            .map_err(map_store_error)?;

        match admission {
            IdempotencyAdmission::Admitted => handler().await,
            IdempotencyAdmission::Duplicate => {
                debug!(req_id = %key, "rejecting duplicate request");
                Err(Error::conflict(format!(
                    "request {key} has already been processed"
                )))
            }
        }
    }
}

fn map_store_error(err: IdempotencyStoreError) -> Error {
    error!(error = %err, "idempotency store failed");
    match err {
        IdempotencyStoreError::Connection { message } => {
            Error::internal(format!("idempotency store unavailable: {message}"))
        }
        IdempotencyStoreError::Query { message } => {
            Error::internal(format!("idempotency store error: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::ErrorCode;
    use crate::domain::ports::MockIdempotencyStore;
    use rstest::rstest;

    fn guard_with(admission: Result<IdempotencyAdmission, IdempotencyStoreError>) -> IdempotencyGuard {
        let mut store = MockIdempotencyStore::new();
        store
            .expect_insert_if_absent()
            .times(1)
            .return_once(move |_| admission);
        IdempotencyGuard::new(Arc::new(store))
    }

    #[rstest]
    #[tokio::test]
    async fn admitted_request_runs_handler() {
        let guard = guard_with(Ok(IdempotencyAdmission::Admitted));
        let calls = AtomicUsize::new(0);

        let value = guard
            .admit_then(&IdempotencyKey::random(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(42)
            })
            .await
            .expect("admitted");

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_request_is_conflict_and_skips_handler() {
        let guard = guard_with(Ok(IdempotencyAdmission::Duplicate));
        let calls = AtomicUsize::new(0);

        let err = guard
            .admit_then(&IdempotencyKey::random(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(())
            })
            .await
            .expect_err("duplicate");

        assert_eq!(err.code(), ErrorCode::Conflict);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[case(IdempotencyStoreError::connection("refused"))]
    #[case(IdempotencyStoreError::query("timeout"))]
    #[tokio::test]
    async fn store_failures_are_internal(#[case] failure: IdempotencyStoreError) {
        let guard = guard_with(Err(failure));

        let err = guard
            .admit_then(&IdempotencyKey::random(), || async { Ok::<_, Error>(()) })
            .await
            .expect_err("store failure");

        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[rstest]
    #[tokio::test]
    async fn handler_errors_pass_through() {
        let guard = guard_with(Ok(IdempotencyAdmission::Admitted));

        let err = guard
            .admit_then(&IdempotencyKey::random(), || async {
                Err::<(), _>(Error::not_found("user missing"))
            })
            .await
            .expect_err("handler error");

        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
