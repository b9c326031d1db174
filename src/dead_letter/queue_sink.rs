//! Substrate-backed dead-letter sink used by the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use super::{DeadLetterRecord, DeadLetterSink, StorageError};
use crate::messaging::DeliverySubstrate;

/// Enqueues records into the lowest-priority dead-letter queue
///
/// A failed enqueue is retried back-to-back up to `write_attempts` times;
/// after that the [`StorageError`] is surfaced and the record is lost to this
/// path (the caller logs the full record).
pub struct QueueDeadLetterSink {
    substrate: Arc<dyn DeliverySubstrate>,
    queue_name: String,
    write_attempts: u32,
}

impl std::fmt::Debug for QueueDeadLetterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDeadLetterSink")
            .field("provider", &self.substrate.provider_name())
            .field("queue_name", &self.queue_name)
            .field("write_attempts", &self.write_attempts)
            .finish()
    }
}

impl QueueDeadLetterSink {
    pub fn new(
        substrate: Arc<dyn DeliverySubstrate>,
        queue_name: impl Into<String>,
        write_attempts: u32,
    ) -> Self {
        Self {
            substrate,
            queue_name: queue_name.into(),
            write_attempts: write_attempts.max(1),
        }
    }
}

#[async_trait]
impl DeadLetterSink for QueueDeadLetterSink {
    async fn persist(&self, record: &DeadLetterRecord) -> Result<(), StorageError> {
        let message = record.to_task_message()?;

        let mut attempt = 1;
        loop {
            match self.substrate.enqueue(&self.queue_name, &message).await {
                Ok(_) => return Ok(()),
                Err(source) if attempt >= self.write_attempts => {
                    error!(
                        queue = %self.queue_name,
                        attempts = attempt,
                        reason = %record.reason,
                        error = %source,
                        "Dead-letter enqueue failed"
                    );
                    return Err(StorageError::Substrate {
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    warn!(
                        queue = %self.queue_name,
                        attempt,
                        error = %source,
                        "Dead-letter enqueue failed, retrying"
                    );
                    attempt += 1;
                }
            }
        }
    }
}
