//! Idempotency primitives for rejecting duplicate RPCs.
//!
//! - [`IdempotencyKey`]: validated UUID sent by clients in the `req-id`
//!   metadata entry.
//! - [`IdempotencyRecord`]: stored membership row for an admitted key.
//! - [`IdempotencyAdmission`]: outcome of the atomic check-and-insert.
//!
//! Keys are recorded before the handler runs, so a request whose handler
//! crashes mid-flight cannot be retried with the same key. Clients must use a
//! fresh key after an ambiguous failure.

mod key;
mod record;

pub use key::{IdempotencyKey, IdempotencyKeyValidationError};
pub use record::{IdempotencyAdmission, IdempotencyRecord};
