//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem. Logs go to
//! stdout so the worker behaves well under a container runtime or a process
//! supervisor.
//!
//! - Environment-based log level configuration
//! - TTY-aware ANSI color output
//! - Optional JSON lines output (`LOG_FORMAT=json`)
//! - Domain-specific structured logging macros
//!
//! ```bash
//! export BETA_WORKER_ENV=production   # info level by default
//! export RUST_LOG=beta_worker=trace   # explicit filter wins
//! export LOG_FORMAT=json
//! ```

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console tracing for the process
///
/// Safe to call more than once and safe to call when another subscriber is
/// already installed (as in tests); later calls are no-ops.
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json_output = use_json_format();

        // Determine if we're in a TTY for ANSI color support
        let use_ansi = !json_output && IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = if json_output {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(console_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                ansi_colors = use_ansi,
                json_output,
                log_level = %log_level,
                "Console logging initialized"
            );
        }
    });
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    std::env::var("BETA_WORKER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment variables or environment defaults
fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return level.to_lowercase();
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        return level;
    }

    default_level_for(environment).to_string()
}

fn default_level_for(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

fn use_json_format() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log dispatcher operations with a uniform structured format
///
/// ```rust,ignore
/// log_dispatch!(info, "retry_scheduled", task_id: task_id, attempt_index: 0, delay_ms: 2000);
/// ```
#[macro_export]
macro_rules! log_dispatch {
    // Full form with task_id
    ($level:ident, $operation:expr, task_id: $task_id:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            task_id = %$task_id,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "DISPATCH_{} (task: {})", $operation, $task_id
        );
    };
    // Simple form - just operation
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "DISPATCH_{}", $operation
        );
    };
    // Generic form with additional fields
    ($level:ident, $operation:expr, $($key:ident: $value:expr),+ $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "DISPATCH_{}", $operation
        );
    };
}

/// Log worker loop operations with a uniform structured format
#[macro_export]
macro_rules! log_worker {
    ($level:ident, $operation:expr, queue: $queue:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            queue = %$queue,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "WORKER_{} (queue: {})", $operation, $queue
        );
    };
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "WORKER_{}", $operation
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        assert_eq!(default_level_for("production"), "info");
        assert_eq!(default_level_for("development"), "debug");
        assert_eq!(default_level_for("test"), "debug");
        assert_eq!(default_level_for("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
        log_dispatch!(debug, "test_event", task_id: uuid::Uuid::nil(), attempt_index: 0u32);
        log_worker!(debug, "test_event", queue: "beta",);
    }
}
