//! LRU disk cache configuration.

use std::path::PathBuf;

/// Settings for one cache directory.
#[derive(Debug, Clone)]
pub struct LruConfig {
    /// Directory holding the journal and entry payloads.
    pub directory: PathBuf,
    /// Maximum total payload size in bytes.
    pub capacity_bytes: u64,
    /// Format tag written into the journal. A mismatch on open discards
    /// the stored entries.
    pub app_version: u32,
}

impl LruConfig {
    pub fn new(directory: impl Into<PathBuf>, capacity_bytes: u64) -> Self {
        Self {
            directory: directory.into(),
            capacity_bytes,
            app_version: crate::APP_VERSION,
        }
    }

    pub fn with_app_version(mut self, app_version: u32) -> Self {
        self.app_version = app_version;
        self
    }
}
