//! Saga completion: finalize or undo a published event from downstream
//! feedback.
//!
//! Feedback may arrive before the dispatcher has marked the event sent, more
//! than once, or for an event this service never wrote. The handler resolves
//! each case to an outcome the consumer can act on:
//!
//! | Event state          | Feedback | Outcome                                  |
//! |----------------------|----------|------------------------------------------|
//! | missing or `waiting` | any      | retry later                              |
//! | `success`/`error`    | any      | already final (duplicate, no-op)         |
//! | `sent`               | `OK`     | mark `success`                           |
//! | `sent`               | other    | undo the business change, mark `error`   |

mod consumer;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::outbox::{
    EventId, FinalStatus, FinalizeOutcome, OutboxEvent, OutboxStatus, USER_DELETED_EVENT,
};
use crate::domain::ports::{
    OutboxStore, OutboxStoreError, RestoreOutcome, UserPersistenceError, UserRepository,
};
use crate::domain::user::UserSnapshot;

pub use consumer::{BatchReport, FeedbackConsumer, FeedbackConsumerConfig, retry_delay};

/// Status string downstream services send when their step succeeded.
pub const FEEDBACK_OK: &str = "OK";

/// Feedback message body: `{"event_id": "<uuid>", "status": "OK" | ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackMessage {
    pub event_id: EventId,
    pub status: String,
}

impl FeedbackMessage {
    /// Decode a raw feedback payload.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Whether the downstream step reported success.
    pub fn is_success(&self) -> bool {
        self.status == FEEDBACK_OK
    }
}

/// What the handler did with one feedback message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// The event was marked `success`.
    Completed,
    /// The business change was undone and the event marked `error`.
    Compensated,
    /// The event was already terminal; the feedback is a duplicate.
    AlreadyFinal(OutboxStatus),
    /// The event is unknown or not yet sent; deliver the feedback again later.
    Retry,
}

impl CompensationOutcome {
    /// Whether the feedback can be acknowledged.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Retry)
    }
}

/// Failures while handling feedback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompensationError {
    #[error(transparent)]
    Outbox(#[from] OutboxStoreError),
    #[error(transparent)]
    Users(#[from] UserPersistenceError),
    /// The stored event payload could not be decoded.
    #[error("event {event_id} has an undecodable payload: {message}")]
    Payload { event_id: EventId, message: String },
    /// No compensating action exists for this event type.
    #[error("event {event_id} has type `{event_type}` with no compensation")]
    UnsupportedEventType {
        event_id: EventId,
        event_type: String,
    },
}

impl CompensationError {
    /// Permanent errors will fail the same way on every redelivery.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Payload { .. } | Self::UnsupportedEventType { .. }
        )
    }
}

/// Applies downstream feedback to the outbox and undoes failed sagas.
#[derive(Clone)]
pub struct CompensationHandler {
    store: Arc<dyn OutboxStore>,
    users: Arc<dyn UserRepository>,
}

impl CompensationHandler {
    pub fn new(store: Arc<dyn OutboxStore>, users: Arc<dyn UserRepository>) -> Self {
        Self { store, users }
    }

    /// Resolve one feedback message.
    pub async fn handle(
        &self,
        feedback: &FeedbackMessage,
    ) -> Result<CompensationOutcome, CompensationError> {
        let Some(event) = self.store.find(feedback.event_id).await? else {
            warn!(event_id = %feedback.event_id, "feedback for unknown event");
            return Ok(CompensationOutcome::Retry);
        };

        match event.status {
            OutboxStatus::Waiting => Ok(CompensationOutcome::Retry),
            status @ (OutboxStatus::Success | OutboxStatus::Error) => {
                info!(event_id = %event.event_id, %status, "duplicate feedback ignored");
                Ok(CompensationOutcome::AlreadyFinal(status))
            }
            OutboxStatus::Sent if feedback.is_success() => {
                self.finalize(event.event_id, FinalStatus::Success).await
            }
            OutboxStatus::Sent => {
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    feedback_status = %feedback.status,
                    "downstream step failed; compensating"
                );
                self.compensate(&event).await?;
                self.finalize(event.event_id, FinalStatus::Error).await
            }
        }
    }

    async fn compensate(&self, event: &OutboxEvent) -> Result<(), CompensationError> {
        if event.event_type != USER_DELETED_EVENT {
            return Err(CompensationError::UnsupportedEventType {
                event_id: event.event_id,
                event_type: event.event_type.clone(),
            });
        }

        let snapshot =
            UserSnapshot::from_payload(&event.payload).map_err(|err| CompensationError::Payload {
                event_id: event.event_id,
                message: err.to_string(),
            })?;

        match self.users.restore(&snapshot.id).await? {
            RestoreOutcome::Restored => {
                info!(event_id = %event.event_id, user_id = %snapshot.id, "user deletion reverted");
            }
            RestoreOutcome::AlreadyActive => {
                info!(event_id = %event.event_id, user_id = %snapshot.id, "user already active");
            }
            RestoreOutcome::NotFound => {
                warn!(
                    event_id = %event.event_id,
                    user_id = %snapshot.id,
                    "user to restore no longer exists"
                );
            }
        }
        Ok(())
    }

    async fn finalize(
        &self,
        event_id: EventId,
        status: FinalStatus,
    ) -> Result<CompensationOutcome, CompensationError> {
        let outcome = match self.store.mark_final(event_id, status).await? {
            FinalizeOutcome::Finalized => match status {
                FinalStatus::Success => CompensationOutcome::Completed,
                FinalStatus::Error => CompensationOutcome::Compensated,
            },
            FinalizeOutcome::AlreadyFinal(current) => CompensationOutcome::AlreadyFinal(current),
            FinalizeOutcome::NotSent | FinalizeOutcome::NotFound => CompensationOutcome::Retry,
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests;
