//! Port abstraction for the downstream feedback channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;

define_port_error! {
    /// Errors raised by feedback source adapters.
    pub enum FeedbackSourceError {
        /// Broker connection could not be established.
        Connection { message: String } => "feedback source connection failed: {message}",
        /// A broker command failed.
        Command { message: String } => "feedback source command failed: {message}",
    }
}

/// One message received from the feedback channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackDelivery {
    /// Broker handle used to acknowledge the message.
    pub receipt: String,
    /// Raw feedback body.
    pub payload: String,
    /// How many times this feedback has been handled, starting at 1.
    pub attempt: u32,
    /// Earliest time the feedback should be handled again. `None` for
    /// feedback that has never been requeued.
    pub not_before: Option<DateTime<Utc>>,
}

impl FeedbackDelivery {
    /// Whether the delivery may be handled at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|due| due <= now)
    }
}

/// How a requeued delivery comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redelivery {
    /// Attempt number the copy carries.
    pub attempt: u32,
    /// Earliest time the copy should be handled.
    pub not_before: DateTime<Utc>,
}

/// Port for consuming feedback with explicit acknowledgement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    /// Receive up to `max` deliveries, waiting briefly when none are ready.
    async fn receive(&self, max: usize) -> Result<Vec<FeedbackDelivery>, FeedbackSourceError>;

    /// Acknowledge a delivery so it is not redelivered.
    async fn ack(&self, delivery: &FeedbackDelivery) -> Result<(), FeedbackSourceError>;

    /// Put the delivery back as described by `redelivery` and acknowledge
    /// this copy.
    async fn requeue(
        &self,
        delivery: &FeedbackDelivery,
        redelivery: Redelivery,
    ) -> Result<(), FeedbackSourceError>;

    /// Park the delivery on the dead-letter channel and acknowledge it.
    async fn dead_letter(
        &self,
        delivery: &FeedbackDelivery,
        reason: &str,
    ) -> Result<(), FeedbackSourceError>;
}
