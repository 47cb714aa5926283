//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Concrete implementations of the user, outbox and idempotency ports backed
//! by PostgreSQL through `diesel-async` and a shared `bb8` pool.
//!
//! - **Thin adapters**: implementations translate between Diesel rows and
//!   domain types; status rules live in the domain.
//! - **Internal models**: row structs (`models.rs`) and the schema
//!   (`schema.rs`) never leave this module.
//! - **Strongly typed errors**: Diesel and pool failures are mapped to the
//!   owning port's error type.
//!
//! ```ignore
//! use accounts::outbound::persistence::{DbPool, DieselOutboxStore, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/accounts")).await?;
//! let outbox = DieselOutboxStore::new(pool.clone());
//! ```

pub(crate) mod diesel_helpers;
mod diesel_idempotency_store;
pub mod diesel_outbox_store;
mod diesel_user_repository;
mod models;
mod pool;
mod schema;

pub use diesel_idempotency_store::DieselIdempotencyStore;
pub use diesel_outbox_store::DieselOutboxStore;
pub use diesel_user_repository::DieselUserRepository;
pub use pool::{DbPool, PoolConfig, PoolError, run_migrations};
