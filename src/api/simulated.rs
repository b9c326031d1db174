//! Demo upstreams for running the worker without real services.
//!
//! The primary honours a `mode` hint in the payload (`"ok"`, `"transient"`,
//! `"fatal"`) and otherwise fails transiently at random. The fallback is
//! deliberately flaky so the dead-letter path gets exercised.

use async_trait::async_trait;
use serde_json::json;

use super::{ApiClient, ApiError, ApiResponse, ClientVariant};
use crate::messaging::Payload;

/// Simulated primary ("beta") upstream
#[derive(Debug, Clone)]
pub struct SimulatedBetaClient {
    transient_failure_rate: f64,
}

impl SimulatedBetaClient {
    pub fn new(transient_failure_rate: f64) -> Self {
        Self {
            transient_failure_rate: transient_failure_rate.clamp(0.0, 1.0),
        }
    }
}

impl Default for SimulatedBetaClient {
    fn default() -> Self {
        Self::new(0.3)
    }
}

#[async_trait]
impl ApiClient for SimulatedBetaClient {
    fn variant(&self) -> ClientVariant {
        ClientVariant::Primary
    }

    async fn call(&self, payload: &Payload) -> Result<ApiResponse, ApiError> {
        let body = || json!({"version": "beta", "ok": true, "echo": payload});

        match payload.get("mode").and_then(|mode| mode.as_str()) {
            Some("ok") => return Ok(ApiResponse::new(ClientVariant::Primary, body())),
            Some("transient") => return Err(ApiError::transient("beta: 503 Service Unavailable")),
            Some("fatal") => return Err(ApiError::fatal("beta: 400 Bad Request")),
            _ => {}
        }

        if rand::random::<f64>() < self.transient_failure_rate {
            return Err(ApiError::transient("beta: random 5xx"));
        }
        Ok(ApiResponse::new(ClientVariant::Primary, body()))
    }
}

/// Simulated fallback ("stable") upstream
#[derive(Debug, Clone)]
pub struct SimulatedStableClient {
    failure_rate: f64,
}

impl SimulatedStableClient {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

impl Default for SimulatedStableClient {
    fn default() -> Self {
        Self::new(0.9)
    }
}

#[async_trait]
impl ApiClient for SimulatedStableClient {
    fn variant(&self) -> ClientVariant {
        ClientVariant::Fallback
    }

    async fn call(&self, payload: &Payload) -> Result<ApiResponse, ApiError> {
        if rand::random::<f64>() < self.failure_rate {
            return Err(ApiError::transient("stable: random 5xx"));
        }
        Ok(ApiResponse::new(
            ClientVariant::Fallback,
            json!({"version": "stable", "ok": true, "echo": payload, "fallback": true}),
        ))
    }
}
