//! Disk cache capability
//!
//! Defines the abstract persistent key/value store consumed by the cache
//! provider. Implementations own eviction, on-disk layout and durability;
//! consumers only see open/close/flush plus per-entry edit and lookup.

pub mod error;

pub use error::{CacheIoError, CacheIoResult};

/// A persistent key/value disk cache.
///
/// Lifecycle calls (`open`, `close`, `flush`) are expected to be serialized
/// by the caller. Entry calls may come from any thread.
pub trait DiskCache: Send + Sync {
    /// Open the backing storage. Opening an open cache is a no-op.
    fn open(&self) -> CacheIoResult<()>;

    /// Persist pending state and release the backing storage.
    fn close(&self) -> CacheIoResult<()>;

    /// Durably persist pending writes.
    fn flush(&self) -> CacheIoResult<()>;

    /// Start an edit transaction for `key`.
    fn begin_edit(&self, key: &str) -> CacheIoResult<Box<dyn CacheEditor>>;

    /// Look up `key`. Returns `Ok(None)` when the key is not stored.
    fn get_entry(&self, key: &str) -> CacheIoResult<Option<Box<dyn CacheEntry>>>;
}

/// A pending write to a single entry. Nothing is visible until `commit`.
pub trait CacheEditor: Send {
    /// Replace the payload that will be committed.
    fn set_string(&mut self, value: &str);

    /// Make the payload visible and durable per the cache's contract.
    fn commit(self: Box<Self>) -> CacheIoResult<()>;

    /// Drop the edit without touching the stored entry.
    fn abort(self: Box<Self>);
}

/// A snapshot of one stored entry.
pub trait CacheEntry: Send {
    /// The stored text payload.
    fn get_string(&self) -> &str;

    /// Payload size in bytes.
    fn size(&self) -> u64 {
        self.get_string().len() as u64
    }
}

/// Plain in-memory entry snapshot, usable by any implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringEntry {
    value: String,
}

impl StringEntry {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }
}

impl CacheEntry for StringEntry {
    fn get_string(&self) -> &str {
        &self.value
    }
}
