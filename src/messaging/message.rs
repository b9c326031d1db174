//! # Task Message Structures
//!
//! Message formats carried through the delivery substrate. The payload is an
//! opaque JSON mapping owned by the producer; nothing in the dispatch path
//! rewrites it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ApiResponse;
use crate::constants::priorities;

/// Application-defined request body
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Scheduling priority, 0 (highest) to 9 (lowest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// Highest priority lane
    pub const HIGHEST: Priority = Priority(priorities::HIGHEST);
    /// Default lane for producer submissions
    pub const DEFAULT: Priority = Priority(priorities::DEFAULT);
    /// Lowest priority lane
    pub const LOWEST: Priority = Priority(priorities::LOWEST);
    /// Lane for dead-letter records
    pub const DEAD_LETTER: Priority = Priority(priorities::DEAD_LETTER);

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value <= priorities::LOWEST {
            Ok(Self(value))
        } else {
            Err(InvalidPriority(value))
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority outside the 0..=9 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("priority {0} is outside the range {min}..={max}", min = priorities::HIGHEST, max = priorities::LOWEST)]
pub struct InvalidPriority(pub u8);

/// Unit of work flowing through the substrate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Stable identifier, used to look up the task outcome
    pub task_id: Uuid,
    /// Original request body, identical on every redelivery
    pub payload: Payload,
    /// Substrate-level scheduling hint
    pub priority: Priority,
    /// When the producer submitted the task
    pub enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(payload: Payload, priority: Priority) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            payload,
            priority,
            enqueued_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Terminal result of a task, kept by the substrate's result backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded { response: ApiResponse },
    Failed { reason: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            TaskOutcome::Succeeded { .. } => "succeeded",
            TaskOutcome::Failed { .. } => "failed",
        }
    }
}
