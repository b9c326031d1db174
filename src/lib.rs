#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Beta Worker
//!
//! Resilient two-tier request dispatcher. Each request goes to a primary
//! upstream first, is retried with exponential backoff on transient failure,
//! is downgraded to a fallback upstream when the primary gives up, and is
//! recorded in an append-only dead-letter trail when both tiers fail.
//!
//! ## Architecture
//!
//! ```text
//! Producer ──enqueue──▶ [primary queue] ──▶ DispatchWorker ──▶ Dispatcher
//!                            ▲                                    │
//!                            └──── schedule_redelivery(delay) ◀───┤ transient, retries left
//!                                                                 ├─▶ Fallback client
//!                                                                 └─▶ [dead-letter queue] ──▶ DeadLetterConsumer ──▶ dlq.log
//! ```
//!
//! Retries are expressed as delayed redelivery by the substrate, never as
//! in-process sleeps, so a worker is never parked on a backoff window.
//!
//! ## Module Organization
//!
//! - [`api`] - Upstream client contract, HTTP and simulated clients
//! - [`orchestration`] - Retry policy, dispatch states and the dispatcher
//! - [`dead_letter`] - Dead-letter records and sinks
//! - [`messaging`] - Delivery substrate contract, pgmq and in-memory providers
//! - [`worker`] - Worker pool, dead-letter consumer and bootstrap
//! - [`producer`] - Request submission and outcome lookup
//! - [`config`] - Layered configuration
//! - [`logging`] - Tracing initialisation and logging macros
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beta_worker::producer::{demo_jobs, Producer};
//! use beta_worker::worker::WorkerSystem;
//!
//! # async fn example() -> beta_worker::WorkerResult<()> {
//! beta_worker::logging::init_tracing();
//!
//! let mut system = WorkerSystem::bootstrap().await?;
//! system.start();
//!
//! let producer = Producer::new(system.substrate(), system.config().queues.primary.clone());
//! for (payload, priority) in demo_jobs() {
//!     producer.submit(payload, priority).await?;
//! }
//!
//! // ...
//! system.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod constants;
pub mod dead_letter;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod orchestration;
pub mod producer;
pub mod worker;

pub use api::{ApiClient, ApiError, ApiResponse, ClientVariant};
pub use config::{ConfigLoader, ConfigurationError, WorkerConfig};
pub use dead_letter::{DeadLetterRecord, DeadLetterSink, StorageError};
pub use error::{WorkerError, WorkerResult};
pub use messaging::{
    DeliveredTask, DeliverySubstrate, MessagingError, Payload, Priority, TaskHandle, TaskMessage,
    TaskOutcome,
};
pub use orchestration::{
    DispatchError, DispatchOutcome, DispatchState, Dispatcher, FallbackOrigin, RetryDecision,
    RetryPolicy,
};
pub use producer::Producer;
