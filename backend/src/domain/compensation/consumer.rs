//! Long-running loop feeding bus deliveries into the compensation handler.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::ports::{FeedbackDelivery, FeedbackSource, FeedbackSourceError, Redelivery};

use super::{CompensationHandler, FeedbackMessage};

/// Delay before retrying after the feedback source itself fails.
const SOURCE_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Longest pause after a batch in which nothing was due, so new feedback is
/// still picked up promptly.
const MAX_IDLE_PAUSE: Duration = Duration::from_secs(1);

/// Consumer batch and redelivery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackConsumerConfig {
    /// Deliveries fetched per receive.
    pub batch_size: usize,
    /// Deliveries after which feedback that still cannot be settled is
    /// dead-lettered.
    pub max_deliveries: u32,
    /// Wait before the second attempt. Doubles with every further attempt.
    pub retry_base_delay: Duration,
    /// Upper bound for the wait between attempts.
    pub retry_max_delay: Duration,
}

impl Default for FeedbackConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_deliveries: 10,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
        }
    }
}

/// Wait before handling feedback again after its `attempt`-th try failed.
pub fn retry_delay(config: &FeedbackConsumerConfig, attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.saturating_sub(1).min(16));
    config
        .retry_base_delay
        .saturating_mul(factor)
        .min(config.retry_max_delay.max(config.retry_base_delay))
}

/// Counts for one processed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub acked: usize,
    /// Deliveries handled without success and put back for a later attempt.
    pub requeued: usize,
    /// Deliveries put back untouched because their retry time had not come.
    pub deferred: usize,
    pub dead_lettered: usize,
    /// Earliest retry time among deferred deliveries.
    pub next_due: Option<DateTime<Utc>>,
}

impl BatchReport {
    /// The batch was non-empty but nothing in it was due.
    pub fn only_deferred(&self) -> bool {
        self.received > 0 && self.deferred == self.received
    }
}

enum Disposition {
    Ack,
    Requeue(Redelivery),
    Defer(Redelivery),
    DeadLetter(String),
}

pub struct FeedbackConsumer {
    source: Arc<dyn FeedbackSource>,
    handler: CompensationHandler,
    config: FeedbackConsumerConfig,
    clock: Arc<dyn Clock>,
}

impl FeedbackConsumer {
    pub fn new(
        source: Arc<dyn FeedbackSource>,
        handler: CompensationHandler,
        config: FeedbackConsumerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            handler,
            config,
            clock,
        }
    }

    /// Receive one batch and settle every delivery in it.
    pub async fn run_batch(&self) -> Result<BatchReport, FeedbackSourceError> {
        let deliveries = self.source.receive(self.config.batch_size).await?;
        let mut report = BatchReport {
            received: deliveries.len(),
            ..BatchReport::default()
        };

        for delivery in &deliveries {
            match self.decide(delivery).await {
                Disposition::Ack => {
                    self.source.ack(delivery).await?;
                    report.acked += 1;
                }
                Disposition::Requeue(redelivery) => {
                    debug!(
                        receipt = %delivery.receipt,
                        attempt = redelivery.attempt,
                        not_before = %redelivery.not_before,
                        "requeueing feedback"
                    );
                    self.source.requeue(delivery, redelivery).await?;
                    report.requeued += 1;
                }
                Disposition::Defer(redelivery) => {
                    self.source.requeue(delivery, redelivery).await?;
                    report.deferred += 1;
                    report.next_due = Some(
                        report
                            .next_due
                            .map_or(redelivery.not_before, |due| due.min(redelivery.not_before)),
                    );
                }
                Disposition::DeadLetter(reason) => {
                    warn!(
                        receipt = %delivery.receipt,
                        attempt = delivery.attempt,
                        reason = %reason,
                        "dead-lettering feedback"
                    );
                    self.source.dead_letter(delivery, &reason).await?;
                    report.dead_lettered += 1;
                }
            }
        }
        Ok(report)
    }

    /// Process batches until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between batches; a batch that has been
    /// received is always settled. When a batch held only feedback waiting
    /// for its retry time, the loop pauses until the earliest one is due.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(batch_size = self.config.batch_size, "feedback consumer started");
        while !shutdown.is_cancelled() {
            match self.run_batch().await {
                Ok(report) if report.only_deferred() => {
                    let pause = self.pause_until(report.next_due);
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(pause) => {}
                    }
                }
                Ok(report) if report.received > 0 => {
                    debug!(
                        received = report.received,
                        acked = report.acked,
                        requeued = report.requeued,
                        deferred = report.deferred,
                        dead_lettered = report.dead_lettered,
                        "feedback batch settled"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    error!(error = %err, "feedback source failed");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(SOURCE_RETRY_DELAY) => {}
                    }
                }
            }
        }
        info!("feedback consumer stopped");
    }

    fn pause_until(&self, due: Option<DateTime<Utc>>) -> Duration {
        due.and_then(|due| (due - self.clock.utc()).to_std().ok())
            .unwrap_or_default()
            .min(MAX_IDLE_PAUSE)
    }

    async fn decide(&self, delivery: &FeedbackDelivery) -> Disposition {
        let now = self.clock.utc();
        if let Some(not_before) = delivery.not_before.filter(|_| !delivery.is_due(now)) {
            return Disposition::Defer(Redelivery {
                attempt: delivery.attempt,
                not_before,
            });
        }

        let feedback = match FeedbackMessage::parse(&delivery.payload) {
            Ok(feedback) => feedback,
            Err(err) => return Disposition::DeadLetter(format!("malformed feedback: {err}")),
        };

        match self.handler.handle(&feedback).await {
            Ok(outcome) if outcome.is_settled() => Disposition::Ack,
            Ok(_) => self.retry_or_give_up(delivery, "event not ready for feedback"),
            Err(err) if err.is_permanent() => Disposition::DeadLetter(err.to_string()),
            Err(err) => {
                warn!(event_id = %feedback.event_id, error = %err, "feedback handling failed");
                self.retry_or_give_up(delivery, &err.to_string())
            }
        }
    }

    fn retry_or_give_up(&self, delivery: &FeedbackDelivery, cause: &str) -> Disposition {
        if delivery.attempt >= self.config.max_deliveries {
            return Disposition::DeadLetter(format!(
                "gave up after {} deliveries: {cause}",
                delivery.attempt
            ));
        }
        let delay = TimeDelta::from_std(retry_delay(&self.config, delivery.attempt))
            .unwrap_or(TimeDelta::MAX);
        Disposition::Requeue(Redelivery {
            attempt: delivery.attempt.saturating_add(1),
            not_before: self
                .clock
                .utc()
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        })
    }
}
