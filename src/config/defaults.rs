//! Built-in defaults
//!
//! Hardcoded defaults and bounds for provider configuration values.

use std::time::Duration;

/// Default cache capacity (default: 10 MiB)
pub const DEFAULT_CAPACITY_BYTES: u64 = 10 * 1024 * 1024;

/// Default delay for coalesced flushes (default: 500 ms)
pub const DEFAULT_FLUSH_DELAY_MS: u64 = 500;

/// Upper bound for the flush delay (1 hour)
pub const MAX_FLUSH_DELAY_MS: u64 = 60 * 60 * 1000;

/// Default worker thread name
pub const DEFAULT_WORKER_NAME: &str = crate::scheduler::DEFAULT_WORKER_NAME;

pub(super) fn capacity_bytes() -> u64 {
    DEFAULT_CAPACITY_BYTES
}

pub(super) fn flush_delay_ms() -> u64 {
    DEFAULT_FLUSH_DELAY_MS
}

pub(super) fn worker_name() -> String {
    DEFAULT_WORKER_NAME.to_string()
}

/// Default flush delay as a `Duration`.
pub fn default_flush_delay() -> Duration {
    Duration::from_millis(DEFAULT_FLUSH_DELAY_MS)
}
