//! # Dispatcher
//!
//! Drives one execution of a delivered task through the dispatch state
//! machine (see [`DispatchState`]). The dispatcher holds no per-task state:
//! the attempt index comes from the substrate's delivery counter, so the same
//! payload at the same attempt count always takes the same transitions.
//!
//! Retries are never slept through in-process. A permitted retry asks the
//! substrate to redeliver after the backoff delay and ends the execution,
//! freeing the worker for other tasks.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::instrument;

use super::retry_policy::{RetryDecision, RetryPolicy};
use super::states::{DispatchState, FallbackOrigin};
use crate::api::{ApiClient, ApiError, ApiResponse};
use crate::config::TimeoutConfig;
use crate::dead_letter::{DeadLetterRecord, DeadLetterSink, StorageError};
use crate::log_dispatch;
use crate::messaging::{DeliveredTask, DeliverySubstrate, MessagingError, Payload};

/// Result of an execution that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// One of the tiers produced a response; `is_fallback` tells which
    Completed(ApiResponse),
    /// Redelivery scheduled; the task is not finished
    RetryScheduled { attempt_index: u32, delay: Duration },
}

impl DispatchOutcome {
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            DispatchOutcome::Completed(response) => Some(response),
            DispatchOutcome::RetryScheduled { .. } => None,
        }
    }
}

/// Errors that surface from a dispatch
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Both tiers failed; the record was written. Final, never retried.
    #[error("fallback failed, request dead-lettered: {reason}")]
    FallbackFailed {
        reason: String,
        record: DeadLetterRecord,
    },

    /// Both tiers failed and the record could not be written. Final.
    #[error("fallback failed ({reason}) and the dead-letter record could not be stored: {source}")]
    DeadLetterStorage {
        reason: String,
        #[source]
        source: StorageError,
    },

    /// Redelivery could not be scheduled; the delivery stays unacknowledged
    #[error("substrate operation failed: {0}")]
    Substrate(#[from] MessagingError),
}

impl DispatchError {
    /// Whether the task is finished (as a failure) after this error
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DispatchError::Substrate(_))
    }

    /// Dead-letter reason, for the terminal variants
    pub fn reason(&self) -> Option<&str> {
        match self {
            DispatchError::FallbackFailed { reason, .. }
            | DispatchError::DeadLetterStorage { reason, .. } => Some(reason),
            DispatchError::Substrate(_) => None,
        }
    }
}

/// Per-call upper bounds for the two tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub primary: Duration,
    pub fallback: Duration,
}

impl From<&TimeoutConfig> for CallTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            primary: config.primary(),
            fallback: config.fallback(),
        }
    }
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

pub struct Dispatcher {
    primary: Arc<dyn ApiClient>,
    fallback: Arc<dyn ApiClient>,
    dead_letters: Arc<dyn DeadLetterSink>,
    substrate: Arc<dyn DeliverySubstrate>,
    policy: RetryPolicy,
    timeouts: CallTimeouts,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("substrate", &self.substrate.provider_name())
            .field("policy", &self.policy)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        primary: Arc<dyn ApiClient>,
        fallback: Arc<dyn ApiClient>,
        dead_letters: Arc<dyn DeadLetterSink>,
        substrate: Arc<dyn DeliverySubstrate>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            fallback,
            dead_letters,
            substrate,
            policy,
            timeouts: CallTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Run one execution of `task`
    #[instrument(skip_all, fields(task_id = %task.message.task_id, attempt_index = task.attempt_count))]
    pub async fn dispatch(&self, task: &DeliveredTask) -> Result<DispatchOutcome, DispatchError> {
        let task_id = task.message.task_id;
        let attempt_index = task.attempt_count;
        let payload = &task.message.payload;

        log_dispatch!(debug, DispatchState::AttemptPrimary,
            task_id: task_id,
            attempt_index: attempt_index,
            priority: task.message.priority.value()
        );

        let origin = match call_with_timeout(self.primary.as_ref(), self.timeouts.primary, payload)
            .await
        {
            Ok(response) => {
                log_dispatch!(info, DispatchState::Success,
                    task_id: task_id,
                    attempt_index: attempt_index,
                    is_fallback: response.is_fallback
                );
                return Ok(DispatchOutcome::Completed(response));
            }
            Err(ApiError::Transient { message }) => match self.policy.decide(attempt_index) {
                RetryDecision::Retry { delay } => {
                    return self.schedule_retry(task, attempt_index, delay, &message).await;
                }
                RetryDecision::Exhausted => {
                    log_dispatch!(warn, DispatchState::AttemptFallback,
                        task_id: task_id,
                        attempt_index: attempt_index,
                        origin: FallbackOrigin::TransientExhausted,
                        primary_error: message
                    );
                    FallbackOrigin::TransientExhausted
                }
            },
            Err(ApiError::Fatal { message }) => {
                log_dispatch!(warn, DispatchState::AttemptFallback,
                    task_id: task_id,
                    attempt_index: attempt_index,
                    origin: FallbackOrigin::PrimaryFatal,
                    primary_error: message
                );
                FallbackOrigin::PrimaryFatal
            }
        };

        self.attempt_fallback(task, origin).await
    }

    async fn schedule_retry(
        &self,
        task: &DeliveredTask,
        attempt_index: u32,
        delay: Duration,
        primary_error: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let task_id = task.message.task_id;

        if let Err(e) = self.substrate.schedule_redelivery(&task.handle, delay).await {
            log_dispatch!(error, "redelivery_failed",
                task_id: task_id,
                attempt_index: attempt_index,
                error: e.to_string()
            );
            return Err(DispatchError::Substrate(e));
        }

        log_dispatch!(info, DispatchState::RetryScheduled,
            task_id: task_id,
            attempt_index: attempt_index,
            delay_ms: delay.as_millis(),
            primary_error: primary_error
        );
        Ok(DispatchOutcome::RetryScheduled {
            attempt_index,
            delay,
        })
    }

    async fn attempt_fallback(
        &self,
        task: &DeliveredTask,
        origin: FallbackOrigin,
    ) -> Result<DispatchOutcome, DispatchError> {
        let task_id = task.message.task_id;
        let attempt_index = task.attempt_count;
        let payload = &task.message.payload;

        let fallback_error = match call_with_timeout(self.fallback.as_ref(), self.timeouts.fallback, payload)
            .await
        {
            Ok(response) => {
                log_dispatch!(info, DispatchState::Success,
                    task_id: task_id,
                    attempt_index: attempt_index,
                    is_fallback: response.is_fallback,
                    origin: origin
                );
                return Ok(DispatchOutcome::Completed(response));
            }
            Err(e) => e,
        };

        let reason = origin.dead_letter_reason(fallback_error.message());

        match self.dead_letters.record(payload, &reason).await {
            Ok(record) => {
                log_dispatch!(error, DispatchState::DeadLettered,
                    task_id: task_id,
                    attempt_index: attempt_index,
                    reason: reason
                );
                Err(DispatchError::FallbackFailed { reason, record })
            }
            Err(source) => {
                // Last trace of the request: keep the full payload in the log
                log_dispatch!(error, "dead_letter_write_failed",
                    task_id: task_id,
                    attempt_index: attempt_index,
                    reason: reason,
                    payload: payload,
                    error: source.to_string()
                );
                Err(DispatchError::DeadLetterStorage { reason, source })
            }
        }
    }
}

/// Bound one upstream call; running out of time counts as transient
async fn call_with_timeout(
    client: &dyn ApiClient,
    limit: Duration,
    payload: &Payload,
) -> Result<ApiResponse, ApiError> {
    tokio::time::timeout(limit, client.call(payload))
        .await
        .unwrap_or_else(|_| {
            Err(ApiError::transient(format!(
                "{}: timed out after {}ms",
                client.variant(),
                limit.as_millis()
            )))
        })
}
