//! Accounts service library: the saga reliability core and its adapters.
//!
//! - [`domain`]: outbox, dispatcher, idempotency guard, circuit breaker and
//!   compensation, expressed against ports.
//! - [`outbound`]: Diesel and Redis Streams adapters for those ports.
//! - [`inbound`]: the `accounts.v1.Accounts` gRPC surface.
//! - [`server`]: settings and startup composition.

pub mod domain;
pub mod inbound;
pub mod outbound;
pub mod server;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
