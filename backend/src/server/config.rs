//! Runtime settings loaded via OrthoConfig.
//!
//! Values come from CLI flags, `ACCOUNTS_*` environment variables and config
//! files. Everything except the database URL has a default.

use std::net::SocketAddr;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{BreakerConfig, DispatcherConfig, FeedbackConsumerConfig};
use crate::outbound::messaging::StreamConsumerConfig;
use crate::outbound::persistence::PoolConfig;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_GRPC_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 50051);
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_FEEDBACK_BLOCK_MS: u64 = 2_000;

/// Errors raised when settings are unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("ACCOUNTS_DATABASE_URL (or --database-url) is required")]
    MissingDatabaseUrl,
}

/// Settings for the accounts service and its background workers.
#[derive(Debug, Clone, Default, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "ACCOUNTS")]
pub struct AccountsSettings {
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Redis URL for the message bus.
    pub redis_url: Option<String>,
    /// gRPC listen address.
    pub grpc_addr: Option<SocketAddr>,
    /// Per-RPC deadline applied by the server.
    pub request_timeout_ms: Option<u64>,
    /// Run the outbox dispatcher on this instance. Enable on exactly one.
    pub dispatcher_enabled: Option<bool>,
    pub dispatch_interval_ms: Option<u64>,
    pub dispatch_batch_size: Option<usize>,
    pub dispatch_max_backoff_ms: Option<u64>,
    pub publish_timeout_ms: Option<u64>,
    pub breaker_failure_threshold: Option<u32>,
    pub breaker_success_threshold: Option<u32>,
    pub breaker_cooldown_ms: Option<u64>,
    pub feedback_batch_size: Option<usize>,
    /// How long one feedback read blocks waiting for new entries.
    pub feedback_block_ms: Option<u64>,
    /// Deliveries after which unresolved feedback is dead-lettered.
    pub feedback_max_deliveries: Option<u32>,
    /// Wait before feedback that could not be applied is handled again.
    pub feedback_retry_base_ms: Option<u64>,
    pub feedback_retry_max_ms: Option<u64>,
    /// Consumer name within the feedback group; must be unique per instance.
    pub consumer_name: Option<String>,
}

impl AccountsSettings {
    /// Return the database URL.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::MissingDatabaseUrl`] when it was not supplied.
    pub fn database_url(&self) -> Result<&str, SettingsError> {
        self.database_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(SettingsError::MissingDatabaseUrl)
    }

    pub fn redis_url(&self) -> &str {
        self.redis_url.as_deref().unwrap_or(DEFAULT_REDIS_URL)
    }

    pub fn grpc_addr(&self) -> SocketAddr {
        self.grpc_addr.unwrap_or(DEFAULT_GRPC_ADDR)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(
            self.request_timeout_ms
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        )
    }

    pub fn dispatcher_enabled(&self) -> bool {
        self.dispatcher_enabled.unwrap_or(true)
    }

    /// Return the consumer name, generating a unique one when unset.
    pub fn consumer_name(&self) -> String {
        self.consumer_name
            .clone()
            .unwrap_or_else(|| format!("accounts-{}", Uuid::new_v4()))
    }

    /// Pool settings for the PostgreSQL adapters.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::MissingDatabaseUrl`] when no URL is configured.
    pub fn pool_config(&self) -> Result<PoolConfig, SettingsError> {
        Ok(PoolConfig::new(self.database_url()?))
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let defaults = DispatcherConfig::default();
        DispatcherConfig {
            interval: millis_or(self.dispatch_interval_ms, defaults.interval),
            batch_size: self.dispatch_batch_size.unwrap_or(defaults.batch_size).max(1),
            max_backoff: millis_or(self.dispatch_max_backoff_ms, defaults.max_backoff),
            publish_timeout: millis_or(self.publish_timeout_ms, defaults.publish_timeout),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        let defaults = BreakerConfig::default();
        BreakerConfig::new(
            self.breaker_failure_threshold
                .unwrap_or(defaults.failure_threshold),
            self.breaker_success_threshold
                .unwrap_or(defaults.success_threshold),
            millis_or(self.breaker_cooldown_ms, defaults.cooldown),
        )
    }

    pub fn feedback_config(&self) -> FeedbackConsumerConfig {
        let defaults = FeedbackConsumerConfig::default();
        FeedbackConsumerConfig {
            batch_size: self.feedback_batch_size.unwrap_or(defaults.batch_size).max(1),
            max_deliveries: self
                .feedback_max_deliveries
                .unwrap_or(defaults.max_deliveries)
                .max(1),
            retry_base_delay: millis_or(self.feedback_retry_base_ms, defaults.retry_base_delay),
            retry_max_delay: millis_or(self.feedback_retry_max_ms, defaults.retry_max_delay),
        }
    }

    pub fn stream_consumer_config(&self) -> StreamConsumerConfig {
        StreamConsumerConfig {
            consumer_name: self.consumer_name(),
            block: Duration::from_millis(
                self.feedback_block_ms.unwrap_or(DEFAULT_FEEDBACK_BLOCK_MS),
            ),
        }
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map_or(default, Duration::from_millis)
}
