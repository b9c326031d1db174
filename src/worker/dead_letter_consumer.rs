//! Drains the dead-letter queue into the append-only dead-letter file.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use super::{PollSettings, WorkerStats};
use crate::dead_letter::{DeadLetterRecord, DeadLetterSink};
use crate::log_worker;
use crate::messaging::{DeliveredTask, DeliverySubstrate, MessagingResult};

pub struct DeadLetterConsumer {
    substrate: Arc<dyn DeliverySubstrate>,
    sink: Arc<dyn DeadLetterSink>,
    settings: PollSettings,
    stats: Arc<WorkerStats>,
}

impl DeadLetterConsumer {
    pub fn new(
        substrate: Arc<dyn DeliverySubstrate>,
        sink: Arc<dyn DeadLetterSink>,
        settings: PollSettings,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            substrate,
            sink,
            settings,
            stats,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log_worker!(info, "dead_letter_consumer_started", queue: self.settings.queue_name,);

        while !*shutdown.borrow() {
            let idle = match self.poll_once().await {
                Ok(count) => count == 0,
                Err(e) => {
                    error!(queue = %self.settings.queue_name, error = %e, "Failed to receive dead letters");
                    self.stats.polling_errors.fetch_add(1, Ordering::Relaxed);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }

        log_worker!(info, "dead_letter_consumer_stopped", queue: self.settings.queue_name,);
    }

    pub async fn poll_once(&self) -> MessagingResult<usize> {
        let batch = self
            .substrate
            .receive(
                &self.settings.queue_name,
                self.settings.batch_size,
                self.settings.visibility_timeout,
            )
            .await?;

        for task in &batch {
            self.persist(task).await;
        }
        Ok(batch.len())
    }

    async fn persist(&self, task: &DeliveredTask) {
        let record = match DeadLetterRecord::from_task_message(&task.message) {
            Ok(record) => record,
            Err(e) => {
                error!(
                    task_id = %task.message.task_id,
                    error = %e,
                    "Unreadable dead-letter message, archiving"
                );
                if let Err(e) = self.substrate.archive(&task.handle).await {
                    error!(handle = %task.handle, error = %e, "Failed to archive dead-letter message");
                }
                return;
            }
        };

        if let Err(e) = self.sink.persist(&record).await {
            // Left unacknowledged so it is redelivered once storage recovers
            self.stats.dead_letter_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                task_id = %task.message.task_id,
                reason = %record.reason,
                payload = ?record.payload,
                error = %e,
                "Failed to persist dead-letter record"
            );
            return;
        }

        self.stats.dead_letters_persisted.fetch_add(1, Ordering::Relaxed);
        match self.substrate.ack(&task.handle).await {
            Ok(()) => info!(reason = %record.reason, "Dead-letter record persisted"),
            Err(e) => error!(handle = %task.handle, error = %e, "Failed to ack dead-letter message"),
        }
    }
}
