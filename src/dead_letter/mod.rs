//! # Dead Letter Sink
//!
//! Durable, append-only trail of requests that exhausted every recovery
//! path. Records are created exactly once per failed task and never updated
//! or deleted here.
//!
//! Two sinks cooperate:
//!
//! ```text
//! Dispatcher ──record──▶ QueueDeadLetterSink ──enqueue (priority 9)──▶ dead-letter queue
//!                                                                           │
//!                        FileDeadLetterSink ◀──persist── DeadLetterConsumer ┘
//! ```
//!
//! The dispatcher only ever writes through the substrate's durable enqueue,
//! so a record survives a crash right after the write.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messaging::{MessagingError, Payload, Priority, TaskMessage};

pub mod file_sink;
pub mod queue_sink;

pub use file_sink::FileDeadLetterSink;
pub use queue_sink::QueueDeadLetterSink;

/// Payload plus failure reason of a request that could not be served
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub payload: Payload,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(payload: Payload, reason: impl Into<String>) -> Self {
        Self {
            payload,
            reason: reason.into(),
            recorded_at: Utc::now(),
        }
    }

    /// Wrap as a lowest-priority task for the dead-letter queue
    pub fn to_task_message(&self) -> Result<TaskMessage, StorageError> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(body) => Ok(TaskMessage::new(body, Priority::DEAD_LETTER)),
            other => Err(StorageError::serialization(format!(
                "dead-letter record serialized to non-object JSON: {other}"
            ))),
        }
    }

    /// Unwrap a task received from the dead-letter queue
    pub fn from_task_message(message: &TaskMessage) -> Result<Self, StorageError> {
        Ok(serde_json::from_value(serde_json::Value::Object(
            message.payload.clone(),
        ))?)
    }
}

/// Dead-letter write failures
///
/// Always terminal for the task: the task is not re-queued, so a broken sink
/// cannot cause an infinite loop.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("dead-letter enqueue failed after {attempts} attempt(s): {source}")]
    Substrate {
        attempts: u32,
        #[source]
        source: MessagingError,
    },

    #[error("dead-letter file {path} could not be written: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dead-letter record serialization failed: {message}")]
    Serialization { message: String },

    #[error("dead-letter write interrupted: {message}")]
    Interrupted { message: String },
}

impl StorageError {
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(err.to_string())
    }
}

/// Append-only dead-letter storage
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Durably store a fully formed record
    async fn persist(&self, record: &DeadLetterRecord) -> Result<(), StorageError>;

    /// Create and store a record for `payload`
    async fn record(&self, payload: &Payload, reason: &str) -> Result<DeadLetterRecord, StorageError> {
        let record = DeadLetterRecord::new(payload.clone(), reason);
        self.persist(&record).await?;
        Ok(record)
    }
}
