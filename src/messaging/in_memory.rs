//! # In-Memory Substrate
//!
//! Delivery substrate that keeps queues in process memory with the same
//! visibility-timeout semantics as pgmq. Visibility deadlines use
//! `tokio::time::Instant`, so tests running on a paused clock can step
//! through backoff windows without real waiting.
//!
//! Unlike pgmq, delivery is priority ordered: the lowest priority value is
//! delivered first, FIFO within a priority.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{
    DeliveredTask, DeliverySubstrate, MessagingError, MessagingResult, ReceiptHandle, TaskHandle,
    TaskMessage, TaskOutcome,
};

/// Message wrapper with delivery bookkeeping
#[derive(Debug, Clone)]
struct InMemoryEntry {
    message: TaskMessage,
    deliveries: u32,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    messages: BTreeMap<i64, InMemoryEntry>,
    archived: Vec<TaskMessage>,
    next_id: i64,
}

/// In-memory substrate implementation
#[derive(Debug, Default)]
pub struct InMemorySubstrate {
    queues: Mutex<HashMap<String, InMemoryQueue>>,
    outcomes: Mutex<HashMap<Uuid, TaskOutcome>>,
}

impl InMemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages still held by a queue, visible or not, in id order
    pub fn pending_messages(&self, queue_name: &str) -> Vec<TaskMessage> {
        self.queues
            .lock()
            .get(queue_name)
            .map(|queue| queue.messages.values().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Messages archived as terminal failures
    pub fn archived_messages(&self, queue_name: &str) -> Vec<TaskMessage> {
        self.queues
            .lock()
            .get(queue_name)
            .map(|queue| queue.archived.clone())
            .unwrap_or_default()
    }

    /// Total messages held by a queue
    pub fn queue_depth(&self, queue_name: &str) -> usize {
        self.queues
            .lock()
            .get(queue_name)
            .map(|queue| queue.messages.len())
            .unwrap_or(0)
    }

    fn message_id(handle: &TaskHandle) -> MessagingResult<i64> {
        handle.receipt.as_i64().ok_or_else(|| {
            MessagingError::message_not_found(&handle.queue_name, handle.receipt.as_str())
        })
    }
}

#[async_trait]
impl DeliverySubstrate for InMemorySubstrate {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.queues.lock().entry(queue_name.to_string()).or_default();
        Ok(())
    }

    async fn enqueue(&self, queue_name: &str, message: &TaskMessage) -> MessagingResult<TaskHandle> {
        let mut queues = self.queues.lock();
        let queue = queues.entry(queue_name.to_string()).or_default();

        let message_id = queue.next_id;
        queue.next_id += 1;
        queue.messages.insert(
            message_id,
            InMemoryEntry {
                message: message.clone(),
                deliveries: 0,
                visible_at: Instant::now(),
            },
        );

        debug!(
            queue = %queue_name,
            message_id = message_id,
            task_id = %message.task_id,
            priority = %message.priority,
            "Enqueued in-memory task"
        );
        Ok(TaskHandle::new(
            queue_name,
            ReceiptHandle::from(message_id),
            message.task_id,
        ))
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<DeliveredTask>> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(queue_name) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut visible: Vec<(u8, i64)> = queue
            .messages
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(id, entry)| (entry.message.priority.value(), *id))
            .collect();
        visible.sort_unstable();

        let mut delivered = Vec::with_capacity(max_messages.min(visible.len()));
        for (_, message_id) in visible.into_iter().take(max_messages) {
            if let Some(entry) = queue.messages.get_mut(&message_id) {
                entry.deliveries += 1;
                entry.visible_at = now + visibility_timeout;
                delivered.push(DeliveredTask {
                    handle: TaskHandle::new(
                        queue_name,
                        ReceiptHandle::from(message_id),
                        entry.message.task_id,
                    ),
                    message: entry.message.clone(),
                    attempt_count: entry.deliveries - 1,
                });
            }
        }

        Ok(delivered)
    }

    async fn schedule_redelivery(
        &self,
        handle: &TaskHandle,
        delay: Duration,
    ) -> MessagingResult<()> {
        let message_id = Self::message_id(handle)?;
        let mut queues = self.queues.lock();
        let entry = queues
            .get_mut(&handle.queue_name)
            .and_then(|queue| queue.messages.get_mut(&message_id))
            .ok_or_else(|| {
                MessagingError::message_not_found(&handle.queue_name, handle.receipt.as_str())
            })?;

        // Far-future deadlines stay hidden rather than overflowing the clock
        entry.visible_at = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(u32::MAX as u64));
        Ok(())
    }

    async fn current_attempt_count(&self, handle: &TaskHandle) -> MessagingResult<u32> {
        let message_id = Self::message_id(handle)?;
        self.queues
            .lock()
            .get(&handle.queue_name)
            .and_then(|queue| queue.messages.get(&message_id))
            .map(|entry| entry.deliveries.saturating_sub(1))
            .ok_or_else(|| {
                MessagingError::message_not_found(&handle.queue_name, handle.receipt.as_str())
            })
    }

    async fn ack(&self, handle: &TaskHandle) -> MessagingResult<()> {
        let message_id = Self::message_id(handle)?;
        if let Some(queue) = self.queues.lock().get_mut(&handle.queue_name) {
            queue.messages.remove(&message_id);
        }
        Ok(())
    }

    async fn archive(&self, handle: &TaskHandle) -> MessagingResult<()> {
        let message_id = Self::message_id(handle)?;
        if let Some(queue) = self.queues.lock().get_mut(&handle.queue_name) {
            if let Some(entry) = queue.messages.remove(&message_id) {
                queue.archived.push(entry.message);
            }
        }
        Ok(())
    }

    async fn record_outcome(&self, task_id: Uuid, outcome: &TaskOutcome) -> MessagingResult<()> {
        self.outcomes
            .lock()
            .entry(task_id)
            .or_insert_with(|| outcome.clone());
        Ok(())
    }

    async fn outcome(&self, task_id: Uuid) -> MessagingResult<Option<TaskOutcome>> {
        Ok(self.outcomes.lock().get(&task_id).cloned())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
