//! # HTTP Upstream Client
//!
//! POSTs the payload as JSON and classifies the result:
//!
//! | outcome                                   | classification |
//! |-------------------------------------------|----------------|
//! | 2xx with JSON body                        | `ApiResponse`  |
//! | connect error, timeout, 408, 429, 5xx     | `Transient`    |
//! | other 4xx, invalid request, bad JSON body | `Fatal`        |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::{ApiClient, ApiError, ApiResponse, ClientVariant};
use crate::messaging::Payload;

/// reqwest-backed [`ApiClient`]
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    variant: ClientVariant,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpApiClient {
    pub fn new(
        variant: ClientVariant,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            variant,
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify_status(&self, status: StatusCode) -> ApiError {
        let message = format!("{}: {status}", self.variant);
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            ApiError::transient(message)
        } else {
            ApiError::fatal(message)
        }
    }

    fn classify_transport(&self, error: &reqwest::Error) -> ApiError {
        let message = format!("{}: {error}", self.variant);
        if error.is_builder() {
            ApiError::fatal(message)
        } else {
            ApiError::transient(message)
        }
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    fn variant(&self) -> ClientVariant {
        self.variant
    }

    async fn call(&self, payload: &Payload) -> Result<ApiResponse, ApiError> {
        debug!(variant = %self.variant, endpoint = %self.endpoint, "Calling upstream");

        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.classify_status(status));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.classify_transport(&e)
            } else {
                ApiError::fatal(format!("{}: undecodable response body: {e}", self.variant))
            }
        })?;

        Ok(ApiResponse::new(self.variant, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> Payload {
        let mut payload = Payload::new();
        payload.insert("job".to_string(), json!(1));
        payload
    }

    async fn client_for(server: &MockServer, variant: ClientVariant) -> HttpApiClient {
        HttpApiClient::new(
            variant,
            format!("{}/v1/request", server.uri()),
            Duration::from_millis(500),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/request"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let response = client_for(&server, ClientVariant::Fallback)
            .await
            .call(&payload())
            .await
            .unwrap();
        assert_eq!(response.body, json!({"ok": true}));
        assert!(response.is_fallback);
    }

    #[tokio::test]
    async fn test_service_unavailable_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let error = client_for(&server, ClientVariant::Primary)
            .await
            .call(&payload())
            .await
            .unwrap_err();
        assert!(error.is_transient());
        assert!(error.message().contains("503"));
    }

    #[tokio::test]
    async fn test_bad_request_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let error = client_for(&server, ClientVariant::Primary)
            .await
            .call(&payload())
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::Fatal { .. }));
    }

    #[tokio::test]
    async fn test_rate_limited_and_slow_responses_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/request"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let limited = client_for(&server, ClientVariant::Primary)
            .await
            .call(&payload())
            .await
            .unwrap_err();
        assert!(limited.is_transient());

        let slow_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&slow_server)
            .await;
        let timed_out = client_for(&slow_server, ClientVariant::Primary)
            .await
            .call(&payload())
            .await
            .unwrap_err();
        assert!(timed_out.is_transient());
    }

    #[tokio::test]
    async fn test_non_json_body_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let error = client_for(&server, ClientVariant::Primary)
            .await
            .call(&payload())
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::Fatal { .. }));
    }
}
