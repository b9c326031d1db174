//! # Worker Bootstrap
//!
//! Turns a [`WorkerConfig`] into a running system: substrate, queues,
//! upstream clients, dispatcher and worker pool.

use std::sync::Arc;

use tracing::info;

use super::{WorkerPool, WorkerStatsSnapshot};
use crate::api::{ApiClient, ClientVariant, HttpApiClient, SimulatedBetaClient, SimulatedStableClient};
use crate::config::{ConfigLoader, SubstrateKind, UpstreamConfig, UpstreamMode, WorkerConfig};
use crate::dead_letter::{DeadLetterSink, FileDeadLetterSink, QueueDeadLetterSink};
use crate::error::{WorkerError, WorkerResult};
use crate::messaging::{DeliverySubstrate, InMemorySubstrate, PgmqSubstrate};
use crate::orchestration::{CallTimeouts, Dispatcher, RetryPolicy};

/// Connect the configured substrate and make sure its schema exists
pub async fn build_substrate(config: &WorkerConfig) -> WorkerResult<Arc<dyn DeliverySubstrate>> {
    let substrate: Arc<dyn DeliverySubstrate> = match config.substrate {
        SubstrateKind::Pgmq => {
            let pgmq = PgmqSubstrate::connect(&config.broker_url, config.max_connections).await?;
            pgmq.ensure_schema().await?;
            Arc::new(pgmq)
        }
        SubstrateKind::InMemory => Arc::new(InMemorySubstrate::new()),
    };
    Ok(substrate)
}

/// Primary and fallback clients for the configured upstream mode
pub fn build_clients(
    upstream: &UpstreamConfig,
    timeouts: CallTimeouts,
) -> WorkerResult<(Arc<dyn ApiClient>, Arc<dyn ApiClient>)> {
    match upstream.mode {
        UpstreamMode::Simulated => Ok((
            Arc::new(SimulatedBetaClient::new(upstream.primary_failure_rate)),
            Arc::new(SimulatedStableClient::new(upstream.fallback_failure_rate)),
        )),
        UpstreamMode::Http => {
            let primary_url = upstream
                .primary_url
                .as_deref()
                .ok_or_else(|| WorkerError::upstream_client("upstream.primary_url is not set"))?;
            let fallback_url = upstream
                .fallback_url
                .as_deref()
                .ok_or_else(|| WorkerError::upstream_client("upstream.fallback_url is not set"))?;

            let primary = HttpApiClient::new(ClientVariant::Primary, primary_url, timeouts.primary)
                .map_err(|e| WorkerError::upstream_client(e.to_string()))?;
            let fallback =
                HttpApiClient::new(ClientVariant::Fallback, fallback_url, timeouts.fallback)
                    .map_err(|e| WorkerError::upstream_client(e.to_string()))?;
            Ok((Arc::new(primary), Arc::new(fallback)))
        }
    }
}

/// A fully wired worker, started or not
pub struct WorkerSystem {
    config: WorkerConfig,
    substrate: Arc<dyn DeliverySubstrate>,
    dispatcher: Arc<Dispatcher>,
    dead_letter_file: Arc<FileDeadLetterSink>,
    pool: Option<WorkerPool>,
}

impl std::fmt::Debug for WorkerSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSystem")
            .field("provider", &self.substrate.provider_name())
            .field("dispatcher", &self.dispatcher)
            .field("running", &self.pool.is_some())
            .finish()
    }
}

impl WorkerSystem {
    /// Load configuration from the environment and wire everything up
    pub async fn bootstrap() -> WorkerResult<Self> {
        let config = ConfigLoader::load_default()?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: WorkerConfig) -> WorkerResult<Self> {
        config.validate()?;
        let substrate = build_substrate(&config).await?;
        let timeouts = CallTimeouts::from(&config.timeouts);
        let (primary, fallback) = build_clients(&config.upstream, timeouts)?;
        Self::assemble(config, substrate, primary, fallback).await
    }

    /// Wire a system around caller-supplied substrate and clients
    pub async fn assemble(
        config: WorkerConfig,
        substrate: Arc<dyn DeliverySubstrate>,
        primary: Arc<dyn ApiClient>,
        fallback: Arc<dyn ApiClient>,
    ) -> WorkerResult<Self> {
        substrate.ensure_queue(&config.queues.primary).await?;
        substrate.ensure_queue(&config.queues.dead_letter).await?;

        let dead_letter_queue: Arc<dyn DeadLetterSink> = Arc::new(QueueDeadLetterSink::new(
            substrate.clone(),
            config.queues.dead_letter.clone(),
            config.dead_letter.write_attempts,
        ));

        let dispatcher = Dispatcher::new(
            primary,
            fallback,
            dead_letter_queue,
            substrate.clone(),
            RetryPolicy::from_config(&config.retry),
        )
        .with_timeouts(CallTimeouts::from(&config.timeouts));

        let mut dead_letter_file = FileDeadLetterSink::new(config.dead_letter.path.clone());
        if !config.dead_letter.sync_on_write {
            dead_letter_file = dead_letter_file.without_sync();
        }

        info!(
            provider = substrate.provider_name(),
            primary_queue = %config.queues.primary,
            dead_letter_queue = %config.queues.dead_letter,
            max_retries = config.retry.max_retries,
            base_backoff_seconds = config.retry.base_backoff_seconds,
            dead_letter_path = %config.dead_letter.path.display(),
            "Worker system assembled"
        );

        Ok(Self {
            config,
            substrate,
            dispatcher: Arc::new(dispatcher),
            dead_letter_file: Arc::new(dead_letter_file),
            pool: None,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn substrate(&self) -> Arc<dyn DeliverySubstrate> {
        self.substrate.clone()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    /// Spawn the worker pool; a second call is a no-op
    pub fn start(&mut self) {
        if self.pool.is_some() {
            return;
        }
        self.pool = Some(WorkerPool::spawn(
            &self.config,
            self.dispatcher.clone(),
            self.substrate.clone(),
            self.dead_letter_file.clone(),
        ));
    }

    /// Stop the pool, if running, and return its final counters
    pub async fn stop(&mut self) -> Option<WorkerStatsSnapshot> {
        match self.pool.take() {
            Some(pool) => Some(pool.shutdown().await),
            None => None,
        }
    }
}
