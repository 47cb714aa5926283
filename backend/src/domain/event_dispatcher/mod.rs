//! Periodic relay from the outbox table to the message bus.
//!
//! Each cycle lists waiting events oldest first, publishes them one by one
//! with a per-publish deadline, and marks the successful ones sent in a single
//! bulk update. Failed events stay waiting and are retried next cycle, so
//! delivery is at least once.
//!
//! Only one dispatcher may run against a database at a time: two dispatchers
//! would list and publish the same waiting rows. Deployments enable exactly
//! one instance through the `dispatcher_enabled` setting.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::outbox::{EventId, OutboxEvent, OutboxStatus};
use crate::domain::ports::{EventPublisher, EventPublisherError, OutboxStore, OutboxStoreError};

/// Dispatcher timing and batch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Delay between healthy cycles.
    pub interval: Duration,
    /// Maximum events handled per cycle.
    pub batch_size: usize,
    /// Upper bound for the delay after repeated systemic failures.
    pub max_backoff: Duration,
    /// Deadline for a single publish.
    pub publish_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 100,
            max_backoff: Duration::from_secs(60),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// Summary of one dispatch cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Waiting events fetched.
    pub fetched: usize,
    /// Events the bus accepted.
    pub published: usize,
    /// Rows moved to `sent`.
    pub marked_sent: usize,
    /// Events whose publish failed or timed out.
    pub failed: usize,
}

impl CycleReport {
    /// Every publish in a non-empty batch failed.
    pub fn all_publishes_failed(&self) -> bool {
        self.fetched > 0 && self.published == 0
    }
}

/// Errors that abort a cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to list waiting events: {0}")]
    List(#[source] OutboxStoreError),
    #[error("failed to mark {published} published events as sent: {source}")]
    MarkSent {
        published: usize,
        #[source]
        source: OutboxStoreError,
    },
}

pub struct EventDispatcher {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: DispatcherConfig,
}

impl EventDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Run one list, publish and mark-sent pass.
    ///
    /// If marking fails after publishing, the published events stay waiting
    /// and will be published again next cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, DispatchError> {
        let events = self
            .store
            .list_pending(OutboxStatus::Waiting, self.config.batch_size)
            .await
            .map_err(DispatchError::List)?;

        let mut report = CycleReport {
            fetched: events.len(),
            ..CycleReport::default()
        };
        if events.is_empty() {
            return Ok(report);
        }

        let mut sent: Vec<EventId> = Vec::with_capacity(events.len());
        let mut failed: Vec<EventId> = Vec::new();
        for event in &events {
            match self.publish_with_deadline(event).await {
                Ok(()) => sent.push(event.event_id),
                Err(err) => {
                    warn!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        retry_count = event.retry_count,
                        error = %err,
                        "outbox publish failed"
                    );
                    failed.push(event.event_id);
                }
            }
        }
        report.published = sent.len();
        report.failed = failed.len();

        if !sent.is_empty() {
            report.marked_sent =
                self.store
                    .mark_sent(&sent)
                    .await
                    .map_err(|source| DispatchError::MarkSent {
                        published: sent.len(),
                        source,
                    })?;
        }

        if !failed.is_empty()
            && let Err(err) = self.store.record_publish_failures(&failed).await
        {
            warn!(error = %err, failed = failed.len(), "failed to record publish failures");
        }

        debug!(
            fetched = report.fetched,
            published = report.published,
            marked_sent = report.marked_sent,
            failed = report.failed,
            "dispatch cycle complete"
        );
        Ok(report)
    }

    /// Run cycles until `shutdown` is cancelled.
    ///
    /// The wait between cycles is interruptible; a cycle that has started
    /// always runs to completion.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_ms = duration_millis(self.config.interval),
            batch_size = self.config.batch_size,
            "event dispatcher started"
        );
        let mut consecutive_failures: u32 = 0;

        while !shutdown.is_cancelled() {
            let healthy = match self.run_cycle().await {
                Ok(report) => !report.all_publishes_failed(),
                Err(err) => {
                    warn!(error = %err, "dispatch cycle failed");
                    false
                }
            };
            consecutive_failures = if healthy {
                0
            } else {
                consecutive_failures.saturating_add(1)
            };

            let delay = backoff_delay(&self.config, consecutive_failures);
            if consecutive_failures > 0 {
                debug!(
                    consecutive_failures,
                    delay_ms = duration_millis(delay),
                    "dispatcher backing off"
                );
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        info!("event dispatcher stopped");
    }

    async fn publish_with_deadline(
        &self,
        event: &OutboxEvent,
    ) -> Result<(), EventPublisherError> {
        let deadline = self.config.publish_timeout;
        match tokio::time::timeout(deadline, self.publisher.publish(event)).await {
            Ok(result) => result,
            Err(_) => Err(EventPublisherError::timeout(duration_millis(deadline))),
        }
    }
}

/// Delay before the next cycle after `consecutive_failures` systemic failures.
///
/// Healthy cycles wait one interval; each further failure doubles the wait up
/// to `max_backoff`.
pub fn backoff_delay(config: &DispatcherConfig, consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return config.interval;
    }
    let factor = 2_u32.saturating_pow(consecutive_failures.min(16));
    config
        .interval
        .saturating_mul(factor)
        .min(config.max_backoff.max(config.interval))
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
