//! # Upstream API Clients
//!
//! One operation, two variants. Every upstream integration maps its native
//! failures into [`ApiError::Transient`] or [`ApiError::Fatal`] at this
//! boundary; nothing downstream inspects error types or messages.
//!
//! - **Primary**: the unreliable upstream. Transient failures are expected
//!   under load; fatal failures recur on identical input.
//! - **Fallback**: the degraded but more reliable path. Its responses are
//!   marked `is_fallback = true` and its failures are never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messaging::Payload;

pub mod http;
pub mod simulated;

pub use http::HttpApiClient;
pub use simulated::{SimulatedBetaClient, SimulatedStableClient};

/// Which tier produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientVariant {
    Primary,
    Fallback,
}

impl std::fmt::Display for ClientVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientVariant::Primary => write!(f, "primary"),
            ClientVariant::Fallback => write!(f, "fallback"),
        }
    }
}

/// Successful upstream result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub variant: ClientVariant,
    pub body: serde_json::Value,
    /// True when the result came from the degraded tier
    pub is_fallback: bool,
}

impl ApiResponse {
    pub fn new(variant: ClientVariant, body: serde_json::Value) -> Self {
        Self {
            variant,
            body,
            is_fallback: variant == ClientVariant::Fallback,
        }
    }
}

/// Classified upstream failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Likely to clear on retry (overload, timeout)
    #[error("transient upstream error: {message}")]
    Transient { message: String },

    /// Retrying the same endpoint is pointless (malformed request)
    #[error("fatal upstream error: {message}")]
    Fatal { message: String },
}

impl ApiError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Transient { message } | ApiError::Fatal { message } => message,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient { .. })
    }
}

/// Upstream call contract shared by both tiers
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Tier this client serves
    fn variant(&self) -> ClientVariant;

    /// Invoke the upstream once
    async fn call(&self, payload: &Payload) -> Result<ApiResponse, ApiError>;
}
