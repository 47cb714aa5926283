//! Domain primitives, ports and the saga reliability core.
//!
//! Purpose: keep cross-service state changes safe under partial failure.
//! Everything here is transport agnostic; adapters live under `inbound` and
//! `outbound`.
//!
//! Public surface:
//! - Error / ErrorCode: transport-agnostic failure payload.
//! - User and friends: the account collaborator's data model.
//! - outbox, idempotency: persisted saga records.
//! - CircuitBreaker, IdempotencyGuard, EventDispatcher, CompensationHandler:
//!   the reliability components.
//! - AccountsService: the RPC use cases composed from the above.

pub mod accounts_service;
pub mod circuit_breaker;
pub mod compensation;
pub mod error;
pub mod event_dispatcher;
pub mod idempotency;
pub mod idempotency_guard;
pub mod outbox;
pub mod ports;
pub mod user;

pub use self::accounts_service::{AccountsService, DeletedUser};
pub use self::circuit_breaker::{BreakerConfig, BreakerError, BreakerPhase, CircuitBreaker};
pub use self::compensation::{
    CompensationHandler, CompensationOutcome, FeedbackConsumer, FeedbackConsumerConfig,
    FeedbackMessage,
};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::event_dispatcher::{DispatcherConfig, EventDispatcher};
pub use self::idempotency_guard::IdempotencyGuard;
pub use self::user::{User, UserId, UserValidationError};
