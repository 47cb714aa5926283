//! Redis Streams publisher and feedback consumer.
//!
//! - Events are appended with `XADD` to a stream named after the event type
//!   (`user-deleted`), carrying `event_id`, `event_type`, `exchange` and the
//!   opaque `payload`.
//! - Feedback is read from `posts-deleted-feedback` through the `accounts`
//!   consumer group. Each delivery is settled exactly once: `XACK`, re-`XADD`
//!   with the next `attempt` and a `not_before` retry time followed by
//!   `XACK`, or a copy to the
//!   dead-letter stream followed by `XACK`. The two-step settlements run in a
//!   `MULTI` block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8;
use bb8_redis::redis::{self, RedisError};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::domain::outbox::{OutboxEvent, USER_LIFECYCLE_EXCHANGE};
use crate::domain::ports::{
    EventPublisher, EventPublisherError, FeedbackDelivery, FeedbackSource, FeedbackSourceError,
    Redelivery,
};

/// Stream the downstream service reports back on.
pub const FEEDBACK_STREAM: &str = "posts-deleted-feedback";
/// Consumer group shared by every accounts instance.
pub const FEEDBACK_GROUP: &str = "accounts";
/// Stream that receives feedback the consumer gave up on.
pub const FEEDBACK_DLQ_STREAM: &str = "posts-deleted-feedback:dlq";

/// Pooled multiplexed Redis connections.
pub type RedisPool = bb8::Pool<RedisConnectionManager>;

/// Build the shared Redis pool.
///
/// # Errors
///
/// Returns the Redis error when the URL is invalid or the first connection
/// cannot be opened.
pub async fn connect(redis_url: &str) -> Result<RedisPool, RedisError> {
    let manager = RedisConnectionManager::new(redis_url)?;
    bb8::Pool::builder().build(manager).await
}

/// Publishes outbox events with `XADD`.
#[derive(Clone)]
pub struct RedisStreamsPublisher {
    pool: RedisPool,
}

impl RedisStreamsPublisher {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventPublisher for RedisStreamsPublisher {
    #[instrument(skip(self, event), fields(event_id = %event.event_id, stream = %event.event_type))]
    async fn publish(&self, event: &OutboxEvent) -> Result<(), EventPublisherError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| EventPublisherError::connection(err.to_string()))?;

        let entry_id: String = redis::cmd("XADD")
            .arg(&event.event_type)
            .arg("*")
            .arg("event_id")
            .arg(event.event_id.to_string())
            .arg("event_type")
            .arg(&event.event_type)
            .arg("exchange")
            .arg(USER_LIFECYCLE_EXCHANGE)
            .arg("payload")
            .arg(event.payload.as_slice())
            .query_async(&mut *conn)
            .await
            .map_err(|err| EventPublisherError::publish(format!("XADD failed: {err}")))?;

        debug!(%entry_id, "event appended to stream");
        Ok(())
    }
}

/// Consumer identity and read behaviour for the feedback stream.
#[derive(Debug, Clone)]
pub struct StreamConsumerConfig {
    /// Unique consumer name within the group.
    pub consumer_name: String,
    /// How long `XREADGROUP` blocks waiting for new entries.
    pub block: Duration,
}

/// Reads feedback from the consumer group with explicit acknowledgement.
pub struct RedisStreamsFeedbackSource {
    pool: RedisPool,
    config: StreamConsumerConfig,
    group_ready: AtomicBool,
}

/// `XREADGROUP` reply: streams, each with `(entry id, fields)` pairs.
/// Fields are `None` for pending entries whose body was trimmed.
type ReadReply = Option<Vec<(String, Vec<(String, Option<HashMap<String, String>>)>)>>;

impl RedisStreamsFeedbackSource {
    pub fn new(pool: RedisPool, config: StreamConsumerConfig) -> Self {
        Self {
            pool,
            config,
            group_ready: AtomicBool::new(false),
        }
    }

    async fn connection(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, FeedbackSourceError> {
        self.pool
            .get()
            .await
            .map_err(|err| FeedbackSourceError::connection(err.to_string()))
    }

    /// Create the consumer group (and stream) once; `BUSYGROUP` means it exists.
    async fn ensure_group(&self) -> Result<(), FeedbackSourceError> {
        if self.group_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut conn = self.connection().await?;

        let created: Result<String, RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(FEEDBACK_STREAM)
            .arg(FEEDBACK_GROUP)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut *conn)
            .await;

        match created {
            Ok(_) => info!(stream = FEEDBACK_STREAM, group = FEEDBACK_GROUP, "consumer group created"),
            Err(err) if err.code() == Some("BUSYGROUP") => {}
            Err(err) => return Err(command_error("XGROUP CREATE", &err)),
        }
        self.group_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn read_group(
        &self,
        max: usize,
        start: &str,
        block: Option<Duration>,
    ) -> Result<Vec<FeedbackDelivery>, FeedbackSourceError> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(FEEDBACK_GROUP)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(max);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(duration_millis(block));
        }
        cmd.arg("STREAMS").arg(FEEDBACK_STREAM).arg(start);

        let reply: ReadReply = match cmd.query_async(&mut *conn).await {
            Ok(reply) => reply,
            Err(err) => {
                if err.code() == Some("NOGROUP") {
                    self.group_ready.store(false, Ordering::Release);
                }
                return Err(command_error("XREADGROUP", &err));
            }
        };

        let mut deliveries = Vec::new();
        let mut trimmed = Vec::new();
        for (_, entries) in reply.unwrap_or_default() {
            for (id, fields) in entries {
                match fields {
                    Some(fields) => deliveries.push(delivery_from_entry(id, fields)),
                    None => trimmed.push(id),
                }
            }
        }

        if !trimmed.is_empty() {
            warn!(count = trimmed.len(), "acknowledging trimmed pending entries");
            let _acked: i64 = redis::cmd("XACK")
                .arg(FEEDBACK_STREAM)
                .arg(FEEDBACK_GROUP)
                .arg(&trimmed)
                .query_async(&mut *conn)
                .await
                .map_err(|err| command_error("XACK", &err))?;
        }
        Ok(deliveries)
    }
}

#[async_trait]
impl FeedbackSource for RedisStreamsFeedbackSource {
    async fn receive(&self, max: usize) -> Result<Vec<FeedbackDelivery>, FeedbackSourceError> {
        self.ensure_group().await?;

        // Entries delivered to this consumer but never settled (e.g. before a
        // restart) come first; only then block for new ones.
        let pending = self.read_group(max, "0", None).await?;
        if !pending.is_empty() {
            debug!(count = pending.len(), "redelivering pending feedback");
            return Ok(pending);
        }
        self.read_group(max, ">", Some(self.config.block)).await
    }

    async fn ack(&self, delivery: &FeedbackDelivery) -> Result<(), FeedbackSourceError> {
        let mut conn = self.connection().await?;
        let _acked: i64 = redis::cmd("XACK")
            .arg(FEEDBACK_STREAM)
            .arg(FEEDBACK_GROUP)
            .arg(&delivery.receipt)
            .query_async(&mut *conn)
            .await
            .map_err(|err| command_error("XACK", &err))?;
        Ok(())
    }

    async fn requeue(
        &self,
        delivery: &FeedbackDelivery,
        redelivery: Redelivery,
    ) -> Result<(), FeedbackSourceError> {
        let mut conn = self.connection().await?;

        let (): () = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(FEEDBACK_STREAM)
            .arg("*")
            .arg("payload")
            .arg(&delivery.payload)
            .arg("attempt")
            .arg(redelivery.attempt)
            .arg("not_before")
            .arg(redelivery.not_before.to_rfc3339())
            .ignore()
            .cmd("XACK")
            .arg(FEEDBACK_STREAM)
            .arg(FEEDBACK_GROUP)
            .arg(&delivery.receipt)
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(|err| command_error("requeue", &err))?;

        debug!(
            receipt = %delivery.receipt,
            attempt = redelivery.attempt,
            not_before = %redelivery.not_before,
            "feedback requeued"
        );
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &FeedbackDelivery,
        reason: &str,
    ) -> Result<(), FeedbackSourceError> {
        let mut conn = self.connection().await?;

        let (): () = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(FEEDBACK_DLQ_STREAM)
            .arg("*")
            .arg("payload")
            .arg(&delivery.payload)
            .arg("attempt")
            .arg(delivery.attempt)
            .arg("reason")
            .arg(reason)
            .arg("original_id")
            .arg(&delivery.receipt)
            .arg("failed_at")
            .arg(Utc::now().to_rfc3339())
            .ignore()
            .cmd("XACK")
            .arg(FEEDBACK_STREAM)
            .arg(FEEDBACK_GROUP)
            .arg(&delivery.receipt)
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(|err| command_error("dead-letter", &err))?;

        warn!(
            receipt = %delivery.receipt,
            attempt = delivery.attempt,
            reason,
            "feedback moved to dead-letter stream"
        );
        Ok(())
    }
}

fn command_error(command: &str, err: &RedisError) -> FeedbackSourceError {
    FeedbackSourceError::command(format!("{command} failed: {err}"))
}

/// Build a delivery from a stream entry. Missing or unparsable attempts
/// count as the first delivery; an unparsable `not_before` means due now.
fn delivery_from_entry(id: String, mut fields: HashMap<String, String>) -> FeedbackDelivery {
    let attempt = fields
        .get("attempt")
        .and_then(|raw| raw.parse::<u32>().ok())
        .unwrap_or(1)
        .max(1);
    let not_before = fields
        .get("not_before")
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|due| due.with_timezone(&Utc));

    FeedbackDelivery {
        receipt: id,
        payload: fields.remove("payload").unwrap_or_default(),
        attempt,
        not_before,
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[rstest]
    #[case(&[("payload", "{}"), ("attempt", "3")], 3)]
    #[case(&[("payload", "{}")], 1)]
    #[case(&[("payload", "{}"), ("attempt", "zero")], 1)]
    #[case(&[("payload", "{}"), ("attempt", "0")], 1)]
    fn attempt_defaults_to_first_delivery(#[case] pairs: &[(&str, &str)], #[case] expected: u32) {
        let delivery = delivery_from_entry("1-0".to_owned(), fields(pairs));
        assert_eq!(delivery.attempt, expected);
        assert_eq!(delivery.payload, "{}");
        assert_eq!(delivery.receipt, "1-0");
    }

    #[rstest]
    fn retry_time_is_read_back() {
        let delivery = delivery_from_entry(
            "3-0".to_owned(),
            fields(&[
                ("payload", "{}"),
                ("attempt", "2"),
                ("not_before", "2026-10-18T12:00:05+00:00"),
            ]),
        );
        let expected = DateTime::parse_from_rfc3339("2026-10-18T12:00:05Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        assert_eq!(delivery.not_before, Some(expected));
        assert!(!delivery.is_due(expected - chrono::TimeDelta::seconds(1)));
        assert!(delivery.is_due(expected));
    }

    #[rstest]
    #[case(&[("payload", "{}")])]
    #[case(&[("payload", "{}"), ("not_before", "soon")])]
    fn missing_retry_time_means_due(#[case] pairs: &[(&str, &str)]) {
        let delivery = delivery_from_entry("4-0".to_owned(), fields(pairs));
        assert_eq!(delivery.not_before, None);
        assert!(delivery.is_due(Utc::now()));
    }

    #[rstest]
    fn missing_payload_becomes_empty_body() {
        let delivery = delivery_from_entry("2-0".to_owned(), fields(&[("attempt", "2")]));
        assert!(delivery.payload.is_empty());
    }
}
