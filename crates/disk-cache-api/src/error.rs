//! Error types for disk cache access.

use std::io;

use thiserror::Error;

/// Result alias used by every disk cache operation.
pub type CacheIoResult<T> = Result<T, CacheIoError>;

/// The single error kind raised by a disk cache.
///
/// Variants exist for diagnostics only. Callers of the orchestration layer
/// treat every variant as "storage access failed".
#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("disk cache is not open")]
    NotOpen,

    #[error("corrupt cache index: {0}")]
    Corrupt(String),

    #[error("cache format version {found} does not match expected {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("entry of {size} bytes exceeds cache capacity of {capacity} bytes")]
    EntryTooLarge { size: u64, capacity: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheIoError {
    /// Shorthand for an injected or synthetic I/O failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Io(io::Error::other(message.into()))
    }

    /// True when the failure means the cache was used outside open/close.
    pub fn is_not_open(&self) -> bool {
        matches!(self, Self::NotOpen)
    }
}
