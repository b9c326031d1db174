use thiserror::Error;

use crate::config::ConfigurationError;
use crate::dead_letter::StorageError;
use crate::messaging::{InvalidPriority, MessagingError};
use crate::orchestration::DispatchError;

/// Crate-level error for bootstrap, producer and worker loops
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Dead-letter storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid priority: {0}")]
    InvalidPriority(#[from] InvalidPriority),

    #[error("Upstream client error: {0}")]
    UpstreamClient(String),
}

impl WorkerError {
    pub fn upstream_client(message: impl Into<String>) -> Self {
        Self::UpstreamClient(message.into())
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
