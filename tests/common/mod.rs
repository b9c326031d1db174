//! Shared fixtures for integration tests: scripted upstreams, recording
//! dead-letter sinks and a substrate wrapper with injectable failures.

#![allow(dead_code)] // Each test binary uses a different subset

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use beta_worker::api::{ApiClient, ApiError, ApiResponse, ClientVariant};
use beta_worker::dead_letter::{DeadLetterRecord, DeadLetterSink, StorageError};
use beta_worker::messaging::{
    DeliveredTask, DeliverySubstrate, InMemorySubstrate, MessagingError, MessagingResult, Payload,
    Priority, TaskHandle, TaskMessage, TaskOutcome,
};
use beta_worker::orchestration::{Dispatcher, RetryPolicy};

/// Build a payload from a JSON object literal
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("payload must be a JSON object, got {other}"),
    }
}

pub fn ok(variant: ClientVariant) -> Result<ApiResponse, ApiError> {
    Ok(ApiResponse::new(variant, json!({ "ok": true, "from": variant.to_string() })))
}

/// Upstream answering from a script, repeating the last entry once drained
pub struct ScriptedClient {
    variant: ClientVariant,
    script: Mutex<VecDeque<Result<ApiResponse, ApiError>>>,
    last: Mutex<Option<Result<ApiResponse, ApiError>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Payload>>,
}

impl ScriptedClient {
    pub fn new(
        variant: ClientVariant,
        script: impl IntoIterator<Item = Result<ApiResponse, ApiError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            variant,
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn always(variant: ClientVariant, result: Result<ApiResponse, ApiError>) -> Arc<Self> {
        Self::new(variant, [result])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Payload> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ApiClient for ScriptedClient {
    fn variant(&self) -> ClientVariant {
        self.variant
    }

    async fn call(&self, payload: &Payload) -> Result<ApiResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(payload.clone());

        let next = self.script.lock().pop_front();
        match next {
            Some(result) => {
                *self.last.lock() = Some(result.clone());
                result
            }
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or_else(|| Err(ApiError::fatal("script exhausted"))),
        }
    }
}

/// Keeps every record in memory
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingSink {
    async fn persist(&self, record: &DeadLetterRecord) -> Result<(), StorageError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Rejects every write
#[derive(Default)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeadLetterSink for FailingSink {
    async fn persist(&self, _record: &DeadLetterRecord) -> Result<(), StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Interrupted {
            message: "sink unavailable".to_string(),
        })
    }
}

/// In-memory substrate with switchable failures
#[derive(Default)]
pub struct FlakySubstrate {
    pub inner: InMemorySubstrate,
    fail_redelivery: AtomicBool,
    failing_enqueues: AtomicU32,
    redeliveries: Mutex<Vec<Duration>>,
}

impl FlakySubstrate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_redelivery(&self, fail: bool) {
        self.fail_redelivery.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` enqueues fail
    pub fn fail_next_enqueues(&self, count: u32) {
        self.failing_enqueues.store(count, Ordering::SeqCst);
    }

    pub fn redeliveries(&self) -> Vec<Duration> {
        self.redeliveries.lock().clone()
    }
}

#[async_trait]
impl DeliverySubstrate for FlakySubstrate {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.inner.ensure_queue(queue_name).await
    }

    async fn enqueue(&self, queue_name: &str, message: &TaskMessage) -> MessagingResult<TaskHandle> {
        let remaining = self.failing_enqueues.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_enqueues.store(remaining - 1, Ordering::SeqCst);
            return Err(MessagingError::queue_operation(queue_name, "enqueue", "injected failure"));
        }
        self.inner.enqueue(queue_name, message).await
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<DeliveredTask>> {
        self.inner
            .receive(queue_name, max_messages, visibility_timeout)
            .await
    }

    async fn schedule_redelivery(&self, handle: &TaskHandle, delay: Duration) -> MessagingResult<()> {
        if self.fail_redelivery.load(Ordering::SeqCst) {
            return Err(MessagingError::queue_operation(
                &handle.queue_name,
                "schedule_redelivery",
                "injected failure",
            ));
        }
        self.redeliveries.lock().push(delay);
        self.inner.schedule_redelivery(handle, delay).await
    }

    async fn current_attempt_count(&self, handle: &TaskHandle) -> MessagingResult<u32> {
        self.inner.current_attempt_count(handle).await
    }

    async fn ack(&self, handle: &TaskHandle) -> MessagingResult<()> {
        self.inner.ack(handle).await
    }

    async fn archive(&self, handle: &TaskHandle) -> MessagingResult<()> {
        self.inner.archive(handle).await
    }

    async fn record_outcome(&self, task_id: Uuid, outcome: &TaskOutcome) -> MessagingResult<()> {
        self.inner.record_outcome(task_id, outcome).await
    }

    async fn outcome(&self, task_id: Uuid) -> MessagingResult<Option<TaskOutcome>> {
        self.inner.outcome(task_id).await
    }

    fn provider_name(&self) -> &'static str {
        "flaky_in_memory"
    }
}

/// Enqueue `payload` and receive it straight back
pub async fn deliver(substrate: &dyn DeliverySubstrate, payload: Payload) -> DeliveredTask {
    substrate
        .enqueue("beta", &TaskMessage::new(payload, Priority::DEFAULT))
        .await
        .expect("enqueue");
    receive_one(substrate).await
}

pub async fn receive_one(substrate: &dyn DeliverySubstrate) -> DeliveredTask {
    let mut batch = substrate
        .receive("beta", 1, Duration::from_secs(60))
        .await
        .expect("receive");
    assert_eq!(batch.len(), 1, "expected exactly one visible task");
    batch.remove(0)
}

/// The same delivery as `task` with a different attempt count
pub fn replay(task: &DeliveredTask, attempt_count: u32) -> DeliveredTask {
    DeliveredTask {
        handle: task.handle.clone(),
        message: task.message.clone(),
        attempt_count,
    }
}

pub fn dispatcher(
    primary: Arc<dyn ApiClient>,
    fallback: Arc<dyn ApiClient>,
    sink: Arc<dyn DeadLetterSink>,
    substrate: Arc<dyn DeliverySubstrate>,
) -> Dispatcher {
    Dispatcher::new(
        primary,
        fallback,
        sink,
        substrate,
        RetryPolicy::new(2, Duration::from_secs(2)),
    )
}
