//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod event_publisher;
mod feedback_source;
mod idempotency_store;
mod outbox_store;
mod user_repository;

#[cfg(test)]
pub use event_publisher::MockEventPublisher;
pub use event_publisher::{EventPublisher, EventPublisherError};
#[cfg(test)]
pub use feedback_source::MockFeedbackSource;
pub use feedback_source::{FeedbackDelivery, FeedbackSource, FeedbackSourceError, Redelivery};
#[cfg(test)]
pub use idempotency_store::MockIdempotencyStore;
pub use idempotency_store::{IdempotencyStore, IdempotencyStoreError};
#[cfg(test)]
pub use outbox_store::MockOutboxStore;
pub use outbox_store::{OutboxStore, OutboxStoreError};
#[cfg(test)]
pub use user_repository::MockUserRepository;
pub use user_repository::{
    CreateUserOutcome, RestoreOutcome, SoftDeleteOutcome, UserPersistenceError, UserRepository,
};
