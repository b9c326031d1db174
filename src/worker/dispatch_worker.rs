//! Polling worker that feeds delivered tasks through the dispatcher.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{PollSettings, WorkerStats};
use crate::log_worker;
use crate::messaging::{DeliveredTask, DeliverySubstrate, MessagingResult, TaskOutcome};
use crate::orchestration::{DispatchError, DispatchOutcome, Dispatcher};

pub struct DispatchWorker {
    worker_id: usize,
    dispatcher: Arc<Dispatcher>,
    substrate: Arc<dyn DeliverySubstrate>,
    settings: PollSettings,
    stats: Arc<WorkerStats>,
}

impl std::fmt::Debug for DispatchWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchWorker")
            .field("worker_id", &self.worker_id)
            .field("settings", &self.settings)
            .finish()
    }
}

impl DispatchWorker {
    pub fn new(
        worker_id: usize,
        dispatcher: Arc<Dispatcher>,
        substrate: Arc<dyn DeliverySubstrate>,
        settings: PollSettings,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            worker_id,
            dispatcher,
            substrate,
            settings,
            stats,
        }
    }

    /// Poll until `shutdown` flips to `true`; in-flight batches always finish
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log_worker!(info, "dispatch_worker_started",
            queue: self.settings.queue_name,
            worker_id: self.worker_id
        );

        while !*shutdown.borrow() {
            let idle = match self.poll_once().await {
                Ok(0) => true,
                Ok(_) => false,
                Err(e) => {
                    error!(
                        worker_id = self.worker_id,
                        queue = %self.settings.queue_name,
                        error = %e,
                        "Failed to receive tasks"
                    );
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

        log_worker!(info, "dispatch_worker_stopped",
            queue: self.settings.queue_name,
            worker_id: self.worker_id
        );
    }

    /// Receive one batch and dispatch it; returns the batch size
    pub async fn poll_once(&self) -> MessagingResult<usize> {
        let batch = self
            .substrate
            .receive(
                &self.settings.queue_name,
                self.settings.batch_size,
                self.settings.visibility_timeout,
            )
            .await?;

        let count = batch.len();
        if count > 0 {
            debug!(worker_id = self.worker_id, count, "Dispatching batch");
            self.stats.received.fetch_add(count as u64, Ordering::Relaxed);
            join_all(batch.iter().map(|task| self.handle(task))).await;
        }
        Ok(count)
    }

    async fn handle(&self, task: &DeliveredTask) {
        match self.dispatcher.dispatch(task).await {
            Ok(DispatchOutcome::Completed(response)) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                if response.is_fallback {
                    self.stats.fallback_completions.fetch_add(1, Ordering::Relaxed);
                }
                self.finish(task, TaskOutcome::Succeeded { response }, false)
                    .await;
            }
            Ok(DispatchOutcome::RetryScheduled { delay, .. }) => {
                self.stats.retries_scheduled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    task_id = %task.message.task_id,
                    delay_ms = delay.as_millis() as u64,
                    "Task handed back to the substrate"
                );
            }
            Err(e @ DispatchError::Substrate(_)) => {
                // Stays unacknowledged; the visibility timeout redelivers it
                self.stats.redelivery_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    task_id = %task.message.task_id,
                    handle = %task.handle,
                    error = %e,
                    "Dispatch interrupted by substrate failure"
                );
            }
            Err(e) => {
                let counter = match e {
                    DispatchError::DeadLetterStorage { .. } => &self.stats.dead_letter_failures,
                    _ => &self.stats.dead_lettered,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                let reason = e.reason().unwrap_or_default().to_string();
                error!(task_id = %task.message.task_id, error = %e, "Task failed terminally");
                self.finish(task, TaskOutcome::Failed { reason }, true).await;
            }
        }
    }

    async fn finish(&self, task: &DeliveredTask, outcome: TaskOutcome, archive: bool) {
        if let Err(e) = self
            .substrate
            .record_outcome(task.message.task_id, &outcome)
            .await
        {
            warn!(
                task_id = %task.message.task_id,
                status = outcome.status(),
                error = %e,
                "Failed to record task outcome"
            );
        }

        let removed = if archive {
            self.substrate.archive(&task.handle).await
        } else {
            self.substrate.ack(&task.handle).await
        };

        match removed {
            Ok(()) => info!(
                task_id = %task.message.task_id,
                status = outcome.status(),
                "Task finished"
            ),
            Err(e) => error!(
                task_id = %task.message.task_id,
                handle = %task.handle,
                error = %e,
                "Failed to remove finished task from queue"
            ),
        }
    }
}

