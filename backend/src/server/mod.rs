//! Startup composition: settings, ports and the long-running tasks.
//!
//! [`build_runtime_components`] wires the domain services from already-built
//! ports, so the binary can pass Diesel and Redis adapters while tests pass
//! in-memory ones.

mod config;
mod workers;

pub use config::{AccountsSettings, SettingsError};
pub use workers::{WorkerHandles, spawn_workers};

use std::sync::Arc;

use mockable::Clock;
use crate::domain::ports::{
    EventPublisher, FeedbackSource, IdempotencyStore, OutboxStore, UserRepository,
};
use crate::domain::{
    AccountsService, CircuitBreaker, CompensationHandler, EventDispatcher, FeedbackConsumer,
    IdempotencyGuard,
};
use crate::inbound::grpc::AccountsGrpc;

/// Name of the breaker guarding the user store.
pub const USER_STORE_BREAKER: &str = "user-store";

/// Adapters the runtime is assembled from.
#[derive(Clone)]
pub struct RuntimePorts {
    pub users: Arc<dyn UserRepository>,
    pub outbox: Arc<dyn OutboxStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub feedback: Arc<dyn FeedbackSource>,
    pub clock: Arc<dyn Clock>,
}

/// Everything `main` needs to serve and run background work.
pub struct RuntimeComponents {
    pub grpc: AccountsGrpc,
    /// Present only when this instance runs the dispatcher.
    pub dispatcher: Option<EventDispatcher>,
    pub consumer: FeedbackConsumer,
    pub breaker: Arc<CircuitBreaker>,
}

/// Compose the domain services over `ports`.
pub fn build_runtime_components(
    settings: &AccountsSettings,
    ports: RuntimePorts,
) -> RuntimeComponents {
    let RuntimePorts {
        users,
        outbox,
        idempotency,
        publisher,
        feedback,
        clock,
    } = ports;

    let breaker = Arc::new(CircuitBreaker::new(
        USER_STORE_BREAKER,
        settings.breaker_config(),
        clock.clone(),
    ));

    let accounts = Arc::new(AccountsService::new(users.clone(), breaker.clone()));
    let grpc = AccountsGrpc::new(accounts, IdempotencyGuard::new(idempotency));

    let dispatcher = settings.dispatcher_enabled().then(|| {
        EventDispatcher::new(outbox.clone(), publisher, settings.dispatcher_config())
    });

    let consumer = FeedbackConsumer::new(
        feedback,
        CompensationHandler::new(outbox, users),
        settings.feedback_config(),
        clock,
    );

    RuntimeComponents {
        grpc,
        dispatcher,
        consumer,
        breaker,
    }
}
