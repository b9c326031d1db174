use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::reasons;

/// Dispatch states for a single task execution
///
/// ```text
/// AttemptPrimary ──▶ RetryScheduled                      (execution ends, substrate redelivers)
///        │
///        └─────────▶ AttemptFallback ──▶ Success
///                                   └──▶ DeadLettered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// Invoking the primary upstream
    AttemptPrimary,
    /// Redelivery requested; this execution is over
    RetryScheduled,
    /// Primary gave up, invoking the fallback upstream
    AttemptFallback,
    /// A response was produced by either tier
    Success,
    /// Both tiers failed and a dead-letter record was written
    DeadLettered,
}

impl DispatchState {
    /// Whether this state ends the current execution
    pub fn ends_execution(&self) -> bool {
        matches!(
            self,
            DispatchState::RetryScheduled | DispatchState::Success | DispatchState::DeadLettered
        )
    }

    /// Whether this state ends the task itself
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Success | DispatchState::DeadLettered)
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::AttemptPrimary => "attempt_primary",
            DispatchState::RetryScheduled => "retry_scheduled",
            DispatchState::AttemptFallback => "attempt_fallback",
            DispatchState::Success => "success",
            DispatchState::DeadLettered => "dead_lettered",
        };
        write!(f, "{name}")
    }
}

/// Why the dispatcher entered the fallback tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackOrigin {
    /// Primary kept failing transiently until the retry budget ran out
    TransientExhausted,
    /// Primary rejected the request outright
    PrimaryFatal,
}

impl FallbackOrigin {
    pub fn reason_prefix(&self) -> &'static str {
        match self {
            FallbackOrigin::TransientExhausted => reasons::FALLBACK_AFTER_TRANSIENT_EXHAUSTED,
            FallbackOrigin::PrimaryFatal => reasons::FALLBACK_AFTER_PRIMARY_FATAL,
        }
    }

    /// Dead-letter reason preserving which path led to the fallback failure
    pub fn dead_letter_reason(&self, fallback_message: &str) -> String {
        format!("{}: {fallback_message}", self.reason_prefix())
    }

    /// Recover the origin from a stored reason string
    pub fn from_reason(reason: &str) -> Option<Self> {
        [FallbackOrigin::TransientExhausted, FallbackOrigin::PrimaryFatal]
            .into_iter()
            .find(|origin| {
                reason
                    .strip_prefix(origin.reason_prefix())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
            })
    }
}

impl fmt::Display for FallbackOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason_prefix())
    }
}
