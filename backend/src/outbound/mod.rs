//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL users, outbox and idempotency keys via Diesel
//! - **messaging**: Redis Streams publisher and feedback consumer
//!
//! Adapters translate between domain types and infrastructure
//! representations. They contain no business logic.

pub mod messaging;
pub mod persistence;
