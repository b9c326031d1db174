//! # Orchestration
//!
//! Retry policy, dispatch states and the dispatcher that applies them to a
//! delivered task.

pub mod dispatcher;
pub mod retry_policy;
pub mod states;

pub use dispatcher::{CallTimeouts, DispatchError, DispatchOutcome, Dispatcher};
pub use retry_policy::{RetryDecision, RetryPolicy};
pub use states::{DispatchState, FallbackOrigin};
