//! # Delivery Substrate
//!
//! Provider-agnostic task delivery with at-least-once semantics, per-task
//! delivery counters, delayed redelivery and a small result backend.
//!
//! ## Architecture
//!
//! ```text
//! DeliverySubstrate (trait)
//!   ├── PgmqSubstrate       <- PostgreSQL + pgmq, production
//!   └── InMemorySubstrate   <- tests and single-process demos
//! ```
//!
//! The dispatcher never sleeps through a backoff window. It asks the
//! substrate to hide the task for `delay` via [`DeliverySubstrate::schedule_redelivery`]
//! and returns; the next delivery bumps the attempt counter.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

pub mod errors;
pub mod in_memory;
pub mod message;
pub mod pgmq;

pub use errors::{MessagingError, MessagingResult};
pub use in_memory::InMemorySubstrate;
pub use message::{InvalidPriority, Payload, Priority, TaskMessage, TaskOutcome};
pub use pgmq::PgmqSubstrate;

/// Provider-specific handle for acknowledging a received message
///
/// - PGMQ: `msg_id` as string
/// - InMemory: monotonically increasing id as string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse as an i64 (pgmq and in-memory message ids)
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ReceiptHandle {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Locates one task inside one queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub queue_name: String,
    pub receipt: ReceiptHandle,
    pub task_id: Uuid,
}

impl TaskHandle {
    pub fn new(queue_name: impl Into<String>, receipt: ReceiptHandle, task_id: Uuid) -> Self {
        Self {
            queue_name: queue_name.into(),
            receipt,
            task_id,
        }
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{} ({})", self.queue_name, self.receipt, self.task_id)
    }
}

/// A task handed to a worker by the substrate
#[derive(Debug, Clone)]
pub struct DeliveredTask {
    pub handle: TaskHandle,
    pub message: TaskMessage,
    /// Prior deliveries of this task: 0 on first delivery, owned by the substrate
    pub attempt_count: u32,
}

/// Task-delivery substrate contract
#[async_trait]
pub trait DeliverySubstrate: Send + Sync + 'static {
    /// Create a queue if it doesn't exist (idempotent)
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Durably enqueue a task; the message carries its own priority
    async fn enqueue(&self, queue_name: &str, message: &TaskMessage) -> MessagingResult<TaskHandle>;

    /// Receive visible tasks, hiding them from other consumers for `visibility_timeout`
    ///
    /// Within a batch, lower priority values come first.
    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<DeliveredTask>>;

    /// Re-enter the same queue after `delay`
    async fn schedule_redelivery(&self, handle: &TaskHandle, delay: Duration)
        -> MessagingResult<()>;

    /// Number of prior deliveries of the task behind `handle`
    async fn current_attempt_count(&self, handle: &TaskHandle) -> MessagingResult<u32>;

    /// Remove a task that reached a terminal state
    async fn ack(&self, handle: &TaskHandle) -> MessagingResult<()>;

    /// Remove a terminally failed task but retain it for audit
    async fn archive(&self, handle: &TaskHandle) -> MessagingResult<()>;

    /// Store the terminal outcome of a task; the first write wins
    async fn record_outcome(&self, task_id: Uuid, outcome: &TaskOutcome) -> MessagingResult<()>;

    /// Look up the terminal outcome of a task, if any
    async fn outcome(&self, task_id: Uuid) -> MessagingResult<Option<TaskOutcome>>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// Queue names must be usable as pgmq table suffixes
pub fn validate_queue_name(queue_name: &str) -> MessagingResult<()> {
    if queue_name.is_empty() {
        return Err(MessagingError::invalid_queue_name(queue_name, "empty"));
    }
    if queue_name.len() > 47 {
        return Err(MessagingError::invalid_queue_name(
            queue_name,
            "longer than 47 characters",
        ));
    }
    if !queue_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(MessagingError::invalid_queue_name(
            queue_name,
            "only ASCII letters, digits and '_' are allowed",
        ));
    }
    Ok(())
}
