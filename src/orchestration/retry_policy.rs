//! # Retry Policy
//!
//! Pure backoff decision: given the number of prior attempts against the
//! primary, either retry after `base_backoff * 2^attempt_index` or report the
//! budget as exhausted. `max_retries` bounds retries, so the primary sees at
//! most `max_retries + 1` attempts.
//!
//! No jitter and no upper cap. Delays that do not fit in a `Duration`
//! saturate at `Duration::MAX`.

use std::time::Duration;

use crate::config::RetryConfig;

/// Outcome of consulting the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redeliver after `delay`
    Retry { delay: Duration },
    /// Budget spent, downgrade to the fallback tier
    Exhausted,
}

impl RetryDecision {
    pub fn should_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            RetryDecision::Retry { delay } => Some(*delay),
            RetryDecision::Exhausted => None,
        }
    }
}

/// Exponential backoff with a bounded retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.base_backoff())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_backoff(&self) -> Duration {
        self.base_backoff
    }

    /// Decide for the attempt that just failed transiently (0-based)
    pub fn decide(&self, attempt_index: u32) -> RetryDecision {
        if attempt_index < self.max_retries {
            RetryDecision::Retry {
                delay: self.backoff_delay(attempt_index),
            }
        } else {
            RetryDecision::Exhausted
        }
    }

    /// `base_backoff * 2^attempt_index`, saturating
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        if self.base_backoff.is_zero() {
            return Duration::ZERO;
        }
        let mut delay = self.base_backoff;
        for _ in 0..attempt_index {
            match delay.checked_mul(2) {
                Some(doubled) => delay = doubled,
                None => return Duration::MAX,
            }
        }
        delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
