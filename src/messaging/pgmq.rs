//! # PostgreSQL Message Queue Substrate (pgmq)
//!
//! Delivery substrate over the pgmq extension, driven through its SQL API on
//! a shared `sqlx::PgPool`:
//!
//! | operation             | pgmq call                          |
//! |-----------------------|------------------------------------|
//! | `enqueue`             | `pgmq.send(queue, msg)`            |
//! | `receive`             | `pgmq.read(queue, vt, qty)`        |
//! | `schedule_redelivery` | `pgmq.set_vt(queue, msg_id, secs)` |
//! | `ack`                 | `pgmq.delete(queue, msg_id)`       |
//! | `archive`             | `pgmq.archive(queue, msg_id)`      |
//!
//! pgmq counts reads in `read_ct`, which starts at 1 on first delivery; the
//! attempt count exposed to the dispatcher is `read_ct - 1`. pgmq works in
//! whole seconds, so sub-second delays are rounded up.
//!
//! pgmq itself is FIFO. Priority is honoured within each read batch only.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    validate_queue_name, DeliveredTask, DeliverySubstrate, MessagingError, MessagingResult,
    ReceiptHandle, TaskHandle, TaskMessage, TaskOutcome,
};

const OUTCOME_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS beta_task_outcomes (
    task_id     UUID PRIMARY KEY,
    status      TEXT NOT NULL,
    outcome     JSONB NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

/// pgmq-backed substrate
#[derive(Debug, Clone)]
pub struct PgmqSubstrate {
    pool: PgPool,
}

impl PgmqSubstrate {
    /// Connect using a connection string
    pub async fn connect(database_url: &str, max_connections: u32) -> MessagingResult<Self> {
        info!(max_connections, "Connecting to pgmq substrate");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to pgmq substrate");
        Ok(Self { pool })
    }

    /// Create a substrate on an existing pool (BYOP)
    pub fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Install the pgmq extension and the outcome table
    pub async fn ensure_schema(&self) -> MessagingResult<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pgmq")
            .execute(&self.pool)
            .await?;
        sqlx::query(OUTCOME_TABLE_DDL).execute(&self.pool).await?;
        debug!("pgmq schema verified");
        Ok(())
    }

    fn message_id(handle: &TaskHandle) -> MessagingResult<i64> {
        handle.receipt.as_i64().ok_or_else(|| {
            MessagingError::message_not_found(&handle.queue_name, handle.receipt.as_str())
        })
    }

    /// Turn one `pgmq.read` row into a delivery; `read_ct` starts at 1
    fn decode_delivery(
        queue_name: &str,
        message_id: i64,
        read_count: i32,
        body: serde_json::Value,
    ) -> Result<DeliveredTask, serde_json::Error> {
        let message = TaskMessage::from_json(body)?;
        Ok(DeliveredTask {
            handle: TaskHandle::new(queue_name, ReceiptHandle::from(message_id), message.task_id),
            message,
            attempt_count: u32::try_from(read_count.saturating_sub(1)).unwrap_or(0),
        })
    }

    fn whole_seconds(duration: Duration) -> i32 {
        let rounded_up = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
        i32::try_from(rounded_up).unwrap_or(i32::MAX)
    }
}

#[async_trait]
impl DeliverySubstrate for PgmqSubstrate {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        validate_queue_name(queue_name)?;
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "create", e.to_string()))?;

        info!(queue = %queue_name, "Queue ready");
        Ok(())
    }

    async fn enqueue(&self, queue_name: &str, message: &TaskMessage) -> MessagingResult<TaskHandle> {
        let body = message.to_json()?;
        let message_id: i64 = sqlx::query_scalar("SELECT pgmq.send($1, $2)")
            .bind(queue_name)
            .bind(body)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "send", e.to_string()))?;

        debug!(
            queue = %queue_name,
            message_id,
            task_id = %message.task_id,
            priority = %message.priority,
            "Enqueued pgmq task"
        );
        Ok(TaskHandle::new(
            queue_name,
            ReceiptHandle::from(message_id),
            message.task_id,
        ))
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<DeliveredTask>> {
        let quantity = i32::try_from(max_messages).unwrap_or(i32::MAX);
        let rows = sqlx::query(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, $3)",
        )
        .bind(queue_name)
        .bind(Self::whole_seconds(visibility_timeout))
        .bind(quantity)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?;

        let mut delivered = Vec::with_capacity(rows.len());
        for row in rows {
            let message_id: i64 = row.try_get("msg_id")?;
            let read_count: i32 = row.try_get("read_ct")?;
            let enqueued_at: DateTime<Utc> = row.try_get("enqueued_at")?;
            let body: serde_json::Value = row.try_get("message")?;

            match Self::decode_delivery(queue_name, message_id, read_count, body) {
                Ok(task) => delivered.push(task),
                Err(e) => {
                    // Undecodable messages would be redelivered forever
                    warn!(
                        queue = %queue_name,
                        message_id,
                        enqueued_at = %enqueued_at,
                        error = %e,
                        "Archiving undecodable message"
                    );
                    // The rest of the batch must still reach the workers
                    if let Err(archive_error) = sqlx::query("SELECT pgmq.archive($1, $2)")
                        .bind(queue_name)
                        .bind(message_id)
                        .execute(&self.pool)
                        .await
                    {
                        error!(
                            queue = %queue_name,
                            message_id,
                            error = %archive_error,
                            "Failed to archive undecodable message"
                        );
                    }
                }
            }
        }

        delivered.sort_by_key(|task| task.message.priority);
        Ok(delivered)
    }

    async fn schedule_redelivery(
        &self,
        handle: &TaskHandle,
        delay: Duration,
    ) -> MessagingResult<()> {
        let message_id = Self::message_id(handle)?;
        let updated: Option<i64> = sqlx::query_scalar("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(&handle.queue_name)
            .bind(message_id)
            .bind(Self::whole_seconds(delay))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(&handle.queue_name, "set_vt", e.to_string())
            })?;

        updated.map(|_| ()).ok_or_else(|| {
            MessagingError::message_not_found(&handle.queue_name, handle.receipt.as_str())
        })
    }

    async fn current_attempt_count(&self, handle: &TaskHandle) -> MessagingResult<u32> {
        validate_queue_name(&handle.queue_name)?;
        let message_id = Self::message_id(handle)?;
        let sql = format!(
            "SELECT read_ct FROM pgmq.q_{} WHERE msg_id = $1",
            handle.queue_name
        );
        let read_count: Option<i32> = sqlx::query_scalar(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        read_count
            .map(|count| u32::try_from(count.saturating_sub(1)).unwrap_or(0))
            .ok_or_else(|| {
                MessagingError::message_not_found(&handle.queue_name, handle.receipt.as_str())
            })
    }

    async fn ack(&self, handle: &TaskHandle) -> MessagingResult<()> {
        let message_id = Self::message_id(handle)?;
        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1, $2)")
            .bind(&handle.queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(&handle.queue_name, "delete", e.to_string())
            })?;

        if !deleted {
            debug!(handle = %handle, "Message already removed");
        }
        Ok(())
    }

    async fn archive(&self, handle: &TaskHandle) -> MessagingResult<()> {
        let message_id = Self::message_id(handle)?;
        let archived: bool = sqlx::query_scalar("SELECT pgmq.archive($1, $2)")
            .bind(&handle.queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(&handle.queue_name, "archive", e.to_string())
            })?;

        if !archived {
            debug!(handle = %handle, "Message already removed");
        }
        Ok(())
    }

    async fn record_outcome(&self, task_id: Uuid, outcome: &TaskOutcome) -> MessagingResult<()> {
        let body = serde_json::to_value(outcome)?;
        sqlx::query(
            "INSERT INTO beta_task_outcomes (task_id, status, outcome) VALUES ($1, $2, $3) \
             ON CONFLICT (task_id) DO NOTHING",
        )
        .bind(task_id)
        .bind(outcome.status())
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn outcome(&self, task_id: Uuid) -> MessagingResult<Option<TaskOutcome>> {
        let body: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT outcome FROM beta_task_outcomes WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;

        body.map(serde_json::from_value)
            .transpose()
            .map_err(MessagingError::from)
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}
