//! # System Constants
//!
//! Names and defaults that define the operational boundaries of the worker.

/// Logical queue names
pub mod queues {
    /// Work queue consumed by dispatch workers
    pub const PRIMARY: &str = "beta";
    /// Lowest-priority queue holding dead-letter records
    pub const DEAD_LETTER: &str = "beta_dlq";
}

/// Task priority bounds (lower value is served first)
pub mod priorities {
    pub const HIGHEST: u8 = 0;
    pub const DEFAULT: u8 = 5;
    pub const LOWEST: u8 = 9;
    /// Dead-letter records always go out at the lowest priority
    pub const DEAD_LETTER: u8 = LOWEST;
}

/// Dead-letter reason prefixes
pub mod reasons {
    pub const FALLBACK_AFTER_TRANSIENT_EXHAUSTED: &str = "fallback_after_transient_exhausted";
    pub const FALLBACK_AFTER_PRIMARY_FATAL: &str = "fallback_after_primary_fatal";
}

/// Built-in configuration defaults
pub mod defaults {
    pub const BROKER_URL: &str = "postgresql://localhost:5432/beta_worker";
    pub const MAX_RETRIES: u32 = 2;
    pub const BASE_BACKOFF_SECONDS: u64 = 2;
    pub const DEAD_LETTER_PATH: &str = "dlq.log";
    pub const DEAD_LETTER_WRITE_ATTEMPTS: u32 = 3;
    pub const PRIMARY_TIMEOUT_MS: u64 = 10_000;
    pub const FALLBACK_TIMEOUT_MS: u64 = 10_000;
    pub const VISIBILITY_TIMEOUT_SECONDS: u64 = 60;
    pub const POLL_INTERVAL_MS: u64 = 250;
    pub const BATCH_SIZE: usize = 10;
    pub const DISPATCH_WORKERS: usize = 4;
    pub const DEAD_LETTER_WORKERS: usize = 1;
    pub const MAX_CONNECTIONS: u32 = 10;
    pub const CONFIG_FILE: &str = "config/beta_worker.toml";
}
