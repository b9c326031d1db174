//! # Producer
//!
//! Submits requests onto the primary queue and looks up their outcomes.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::error::WorkerResult;
use crate::messaging::{DeliverySubstrate, Payload, Priority, TaskHandle, TaskMessage, TaskOutcome};

pub struct Producer {
    substrate: Arc<dyn DeliverySubstrate>,
    queue_name: String,
}

impl Producer {
    pub fn new(substrate: Arc<dyn DeliverySubstrate>, queue_name: impl Into<String>) -> Self {
        Self {
            substrate,
            queue_name: queue_name.into(),
        }
    }

    /// Enqueue `payload`; `priority` must be within 0..=9 (lower is served first)
    pub async fn enqueue(&self, payload: Payload, priority: u8) -> WorkerResult<TaskHandle> {
        let priority = Priority::try_from(priority)?;
        self.submit(payload, priority).await
    }

    pub async fn submit(&self, payload: Payload, priority: Priority) -> WorkerResult<TaskHandle> {
        let message = TaskMessage::new(payload, priority);
        let handle = self.substrate.enqueue(&self.queue_name, &message).await?;
        info!(
            task_id = %handle.task_id,
            queue = %self.queue_name,
            priority = %priority,
            "Task enqueued"
        );
        Ok(handle)
    }

    /// Terminal outcome of a submitted task, `None` while it is still pending
    pub async fn outcome(&self, handle: &TaskHandle) -> WorkerResult<Option<TaskOutcome>> {
        Ok(self.substrate.outcome(handle.task_id).await?)
    }
}

/// The three demonstration jobs: one urgent success, one transient, one fatal
pub fn demo_jobs() -> Vec<(Payload, Priority)> {
    let job = |id: u64, mode: &str| {
        let mut payload = Payload::new();
        payload.insert("job".to_string(), json!(id));
        payload.insert("mode".to_string(), json!(mode));
        payload
    };

    vec![
        (job(1, "ok"), Priority::HIGHEST),
        (job(2, "transient"), Priority::DEFAULT),
        (job(3, "fatal"), Priority::DEFAULT),
    ]
}
