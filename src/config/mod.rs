//! # Worker Configuration
//!
//! Typed configuration for the dispatcher, the delivery substrate and the
//! worker pools. Every field has a default, so an empty environment yields a
//! runnable worker (`max_retries = 2`, `base_backoff_seconds = 2`).
//!
//! Layering is handled by [`ConfigLoader`]:
//!
//! 1. built-in defaults
//! 2. optional TOML file (`BETA_WORKER_CONFIG`, or `config/beta_worker.toml`)
//! 3. `BETA_WORKER__SECTION__FIELD` environment variables
//! 4. the flat legacy names `MAX_RETRIES`, `BASE_BACKOFF_SECONDS`, `DATABASE_URL`

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, queues};
use crate::messaging::validate_queue_name;

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Which delivery substrate backs the queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubstrateKind {
    #[default]
    Pgmq,
    InMemory,
}

/// Which upstream clients the worker talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamMode {
    #[default]
    Simulated,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub broker_url: String,
    pub substrate: SubstrateKind,
    pub max_connections: u32,
    pub retry: RetryConfig,
    pub queues: QueueConfig,
    pub timeouts: TimeoutConfig,
    pub worker: WorkerPoolConfig,
    pub dead_letter: DeadLetterConfig,
    pub upstream: UpstreamConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            broker_url: defaults::BROKER_URL.to_string(),
            substrate: SubstrateKind::default(),
            max_connections: defaults::MAX_CONNECTIONS,
            retry: RetryConfig::default(),
            queues: QueueConfig::default(),
            timeouts: TimeoutConfig::default(),
            worker: WorkerPoolConfig::default(),
            dead_letter: DeadLetterConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

/// Retry budget for the primary upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_backoff_seconds: u64,
}

impl RetryConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_secs(self.base_backoff_seconds)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_backoff_seconds: defaults::BASE_BACKOFF_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub primary: String,
    pub dead_letter: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            primary: queues::PRIMARY.to_string(),
            dead_letter: queues::DEAD_LETTER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub primary_ms: u64,
    pub fallback_ms: u64,
    /// How long a received message stays hidden before redelivery
    pub visibility_timeout_seconds: u64,
}

impl TimeoutConfig {
    pub fn primary(&self) -> Duration {
        Duration::from_millis(self.primary_ms)
    }

    pub fn fallback(&self) -> Duration {
        Duration::from_millis(self.fallback_ms)
    }

    pub fn visibility(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            primary_ms: defaults::PRIMARY_TIMEOUT_MS,
            fallback_ms: defaults::FALLBACK_TIMEOUT_MS,
            visibility_timeout_seconds: defaults::VISIBILITY_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub dispatch_workers: usize,
    pub dead_letter_workers: usize,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
}

impl WorkerPoolConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            dispatch_workers: defaults::DISPATCH_WORKERS,
            dead_letter_workers: defaults::DEAD_LETTER_WORKERS,
            batch_size: defaults::BATCH_SIZE,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// JSON-lines file the dead-letter consumer appends to
    pub path: PathBuf,
    /// Back-to-back enqueue attempts before a record write is reported failed
    pub write_attempts: u32,
    pub sync_on_write: bool,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::DEAD_LETTER_PATH),
            write_attempts: defaults::DEAD_LETTER_WRITE_ATTEMPTS,
            sync_on_write: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub mode: UpstreamMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_url: Option<String>,
    /// Simulated mode only
    pub primary_failure_rate: f64,
    /// Simulated mode only
    pub fallback_failure_rate: f64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            mode: UpstreamMode::default(),
            primary_url: None,
            fallback_url: None,
            primary_failure_rate: 0.3,
            fallback_failure_rate: 0.9,
        }
    }
}

impl WorkerConfig {
    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.broker_url.is_empty() && self.substrate == SubstrateKind::Pgmq {
            return Err(ConfigurationError::missing_required_field(
                "broker_url",
                "pgmq substrate configuration",
            ));
        }

        for (field, name) in [
            ("queues.primary", &self.queues.primary),
            ("queues.dead_letter", &self.queues.dead_letter),
        ] {
            if validate_queue_name(name).is_err() {
                return Err(ConfigurationError::invalid_value(
                    field,
                    name.as_str(),
                    "queue names must be 1-47 characters of [A-Za-z0-9_]",
                ));
            }
        }

        if self.queues.primary == self.queues.dead_letter {
            return Err(ConfigurationError::invalid_value(
                "queues.dead_letter",
                self.queues.dead_letter.as_str(),
                "dead-letter queue must differ from the primary queue",
            ));
        }

        for (field, value) in [
            ("worker.dispatch_workers", self.worker.dispatch_workers),
            ("worker.dead_letter_workers", self.worker.dead_letter_workers),
            ("worker.batch_size", self.worker.batch_size),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "must be greater than 0",
                ));
            }
        }

        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }

        if self.dead_letter.write_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "dead_letter.write_attempts",
                "0",
                "at least one write attempt is required",
            ));
        }

        let call_budget_ms = self
            .timeouts
            .primary_ms
            .saturating_add(self.timeouts.fallback_ms);
        let visibility_ms = self.timeouts.visibility_timeout_seconds.saturating_mul(1000);
        if visibility_ms <= call_budget_ms {
            return Err(ConfigurationError::invalid_value(
                "timeouts.visibility_timeout_seconds",
                self.timeouts.visibility_timeout_seconds.to_string(),
                format!(
                    "must exceed the combined primary and fallback timeouts ({call_budget_ms}ms) \
                     or messages are redelivered while still in flight"
                ),
            ));
        }

        for (field, rate) in [
            ("upstream.primary_failure_rate", self.upstream.primary_failure_rate),
            ("upstream.fallback_failure_rate", self.upstream.fallback_failure_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigurationError::invalid_value(
                    field,
                    rate.to_string(),
                    "failure rate must be between 0.0 and 1.0",
                ));
            }
        }

        if self.upstream.mode == UpstreamMode::Http {
            if self.upstream.primary_url.is_none() {
                return Err(ConfigurationError::missing_required_field(
                    "upstream.primary_url",
                    "http upstream configuration",
                ));
            }
            if self.upstream.fallback_url.is_none() {
                return Err(ConfigurationError::missing_required_field(
                    "upstream.fallback_url",
                    "http upstream configuration",
                ));
            }
        }

        Ok(())
    }

    /// JSON view of the configuration with credentials masked
    pub fn sanitized(&self) -> serde_json::Value {
        let mut sanitized = self.clone();
        sanitized.broker_url = mask_credentials(&self.broker_url);
        sanitized.upstream.primary_url = self.upstream.primary_url.as_deref().map(mask_credentials);
        sanitized.upstream.fallback_url = self.upstream.fallback_url.as_deref().map(mask_credentials);
        serde_json::to_value(&sanitized).unwrap_or(serde_json::Value::Null)
    }
}

/// Replace the user-info part of a URL with `***`
pub fn mask_credentials(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let authority_end = url[authority_start..]
        .find('/')
        .map(|i| authority_start + i)
        .unwrap_or(url.len());

    match url[authority_start..authority_end].rfind('@') {
        Some(at) => format!(
            "{}***{}",
            &url[..authority_start],
            &url[authority_start + at..]
        ),
        None => url.to_string(),
    }
}
