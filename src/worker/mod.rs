//! # Worker Pool
//!
//! Long-running tokio tasks that poll the substrate:
//!
//! - `worker.dispatch_workers` [`DispatchWorker`]s on the primary queue
//! - `worker.dead_letter_workers` [`DeadLetterConsumer`]s on the dead-letter queue
//!
//! Workers keep nothing between executions; a backoff is a scheduled
//! redelivery, never a sleep inside a worker. Shutdown stops polling and waits
//! for in-flight batches, anything unacknowledged becomes visible again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::dead_letter::DeadLetterSink;
use crate::messaging::DeliverySubstrate;
use crate::orchestration::Dispatcher;

pub mod bootstrap;
pub mod dead_letter_consumer;
pub mod dispatch_worker;

pub use bootstrap::{build_clients, build_substrate, WorkerSystem};
pub use dead_letter_consumer::DeadLetterConsumer;
pub use dispatch_worker::DispatchWorker;

/// Where and how a worker polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub queue_name: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
}

impl PollSettings {
    pub fn primary(config: &WorkerConfig) -> Self {
        Self {
            queue_name: config.queues.primary.clone(),
            batch_size: config.worker.batch_size,
            poll_interval: config.worker.poll_interval(),
            visibility_timeout: config.timeouts.visibility(),
        }
    }

    pub fn dead_letter(config: &WorkerConfig) -> Self {
        Self {
            queue_name: config.queues.dead_letter.clone(),
            ..Self::primary(config)
        }
    }
}

/// Counters shared by every worker in a pool
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub received: AtomicU64,
    pub completed: AtomicU64,
    pub fallback_completions: AtomicU64,
    pub retries_scheduled: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub dead_letter_failures: AtomicU64,
    pub dead_letters_persisted: AtomicU64,
    pub redelivery_failures: AtomicU64,
    pub polling_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub received: u64,
    pub completed: u64,
    pub fallback_completions: u64,
    pub retries_scheduled: u64,
    pub dead_lettered: u64,
    pub dead_letter_failures: u64,
    pub dead_letters_persisted: u64,
    pub redelivery_failures: u64,
    pub polling_errors: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            fallback_completions: self.fallback_completions.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dead_letter_failures: self.dead_letter_failures.load(Ordering::Relaxed),
            dead_letters_persisted: self.dead_letters_persisted.load(Ordering::Relaxed),
            redelivery_failures: self.redelivery_failures.load(Ordering::Relaxed),
            polling_errors: self.polling_errors.load(Ordering::Relaxed),
        }
    }
}

/// Handles of running workers plus their shutdown switch
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    stats: Arc<WorkerStats>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn dispatch workers and dead-letter consumers
    pub fn spawn(
        config: &WorkerConfig,
        dispatcher: Arc<Dispatcher>,
        substrate: Arc<dyn DeliverySubstrate>,
        dead_letter_file: Arc<dyn DeadLetterSink>,
    ) -> Self {
        let (shutdown, receiver) = watch::channel(false);
        let stats = Arc::new(WorkerStats::default());
        let mut handles = Vec::new();

        for worker_id in 0..config.worker.dispatch_workers {
            let worker = DispatchWorker::new(
                worker_id,
                dispatcher.clone(),
                substrate.clone(),
                PollSettings::primary(config),
                stats.clone(),
            );
            handles.push(tokio::spawn(worker.run(receiver.clone())));
        }

        for _ in 0..config.worker.dead_letter_workers {
            let consumer = DeadLetterConsumer::new(
                substrate.clone(),
                dead_letter_file.clone(),
                PollSettings::dead_letter(config),
                stats.clone(),
            );
            handles.push(tokio::spawn(consumer.run(receiver.clone())));
        }

        info!(
            dispatch_workers = config.worker.dispatch_workers,
            dead_letter_workers = config.worker.dead_letter_workers,
            provider = substrate.provider_name(),
            "Worker pool started"
        );

        Self {
            handles,
            shutdown,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop polling and wait for every worker to finish its current batch
    pub async fn shutdown(self) -> WorkerStatsSnapshot {
        if self.shutdown.send(true).is_err() {
            warn!("All workers already stopped before shutdown");
        }

        for result in join_all(self.handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }

        let snapshot = self.stats.snapshot();
        info!(stats = ?snapshot, "Worker pool stopped");
        snapshot
    }
}
