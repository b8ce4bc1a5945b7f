//! Cache provider
//!
//! Entry reads and writes go straight to the disk cache on the calling
//! thread. Open, close and flush are handed to the lifecycle scheduler.
//!
//! Every operation comes in two flavours. The plain form (`write`, `read`,
//! `open_async`, ...) logs failures and carries on. The strict form
//! (`try_write`, `try_read`, `open_tracked`, ...) returns the error or a
//! ticket to the caller.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use disk_cache_api::{CacheIoResult, DiskCache};
use lru_disk_cache::{LruConfig, LruDiskCache};
use thiserror::Error;

use crate::config::{default_flush_delay, ConfigError, ProviderConfig};
use crate::event::EventHandler;
use crate::operation::LifecycleOperation;
use crate::scheduler::{LifecycleScheduler, LifecycleTicket};
use crate::worker::Worker;

/// Errors building a provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid provider config: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn lifecycle worker: {0}")]
    WorkerSpawn(#[from] io::Error),
}

/// Facade over one disk cache and the scheduler that manages its lifecycle.
pub struct CacheProvider {
    scheduler: LifecycleScheduler,
    default_flush_delay: Duration,
}

impl CacheProvider {
    /// Wrap `disk_cache` with a freshly spawned scheduler.
    pub fn new(disk_cache: Arc<dyn DiskCache>) -> io::Result<Self> {
        Ok(Self::with_scheduler(LifecycleScheduler::new(disk_cache)?))
    }

    /// Wrap an existing scheduler; the provider uses its disk cache.
    pub fn with_scheduler(scheduler: LifecycleScheduler) -> Self {
        Self {
            scheduler,
            default_flush_delay: default_flush_delay(),
        }
    }

    /// Delay used by [`flush_async_with_default_delay`](Self::flush_async_with_default_delay).
    pub fn with_default_flush_delay(mut self, delay: Duration) -> Self {
        self.default_flush_delay = delay;
        self
    }

    /// Provider over an LRU disk cache at `storage_path` holding at most
    /// `capacity_bytes` of payload.
    ///
    /// The cache is not opened; call [`open_async`](Self::open_async).
    pub fn create_with_lru_backend(
        storage_path: impl Into<PathBuf>,
        capacity_bytes: u64,
    ) -> io::Result<Self> {
        let cache = LruDiskCache::new(storage_path, capacity_bytes);
        Self::new(Arc::new(cache))
    }

    /// Provider over an LRU disk cache built from validated settings.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        config.validate()?;

        let lru_config = LruConfig::new(&config.storage_path, config.capacity_bytes);
        let cache: Arc<dyn DiskCache> = Arc::new(LruDiskCache::with_config(lru_config));
        let worker = Worker::new(config.worker_name.clone())?;

        tracing::debug!(
            storage_path = %config.storage_path.display(),
            capacity_bytes = config.capacity_bytes,
            worker = %config.worker_name,
            "building cache provider from config"
        );

        Ok(Self::with_scheduler(LifecycleScheduler::with_worker(cache, worker))
            .with_default_flush_delay(config.flush_delay()))
    }

    /// The owned disk cache.
    pub fn disk_cache(&self) -> &Arc<dyn DiskCache> {
        self.scheduler.disk_cache()
    }

    pub fn scheduler(&self) -> &LifecycleScheduler {
        &self.scheduler
    }

    pub fn default_flush_delay(&self) -> Duration {
        self.default_flush_delay
    }

    /// Store `value` under `key`. An empty key is ignored.
    pub fn try_write(&self, key: &str, value: &str) -> CacheIoResult<()> {
        if key.is_empty() {
            return Ok(());
        }

        let _access = self.scheduler.entry_access();
        let mut editor = self.disk_cache().begin_edit(key)?;
        editor.set_string(value);
        editor.commit()
    }

    /// Store `value` under `key`, logging any failure.
    pub fn write(&self, key: &str, value: &str) {
        if let Err(e) = self.try_write(key, value) {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }

    /// Look up `key`. An empty key is never present.
    pub fn try_read(&self, key: &str) -> CacheIoResult<Option<String>> {
        if key.is_empty() {
            return Ok(None);
        }

        let _access = self.scheduler.entry_access();
        let entry = self.disk_cache().get_entry(key)?;
        Ok(entry.map(|entry| entry.get_string().to_string()))
    }

    /// Look up `key`; failures are logged and read as absent.
    pub fn read(&self, key: &str) -> Option<String> {
        match self.try_read(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                None
            }
        }
    }

    pub fn open_async(&self) {
        self.open_tracked();
    }

    pub fn close_async(&self) {
        self.close_tracked();
    }

    pub fn flush_async(&self) {
        self.flush_tracked();
    }

    /// Flush once `delay` has elapsed, folding into an already pending
    /// delayed flush if there is one.
    pub fn flush_async_with_delay(&self, delay: Duration) {
        self.flush_tracked_with_delay(delay);
    }

    pub fn flush_async_with_default_delay(&self) {
        self.flush_async_with_delay(self.default_flush_delay);
    }

    pub fn open_tracked(&self) -> LifecycleTicket {
        self.submit(LifecycleOperation::Init)
    }

    pub fn close_tracked(&self) -> LifecycleTicket {
        self.submit(LifecycleOperation::Close)
    }

    pub fn flush_tracked(&self) -> LifecycleTicket {
        self.submit(LifecycleOperation::Flush)
    }

    /// Returns `None` when the request was coalesced into a pending flush.
    pub fn flush_tracked_with_delay(&self, delay: Duration) -> Option<LifecycleTicket> {
        tracing::debug!(provider = ?self, delay_ms = delay.as_millis() as u64, "delayed flush requested");
        self.scheduler.submit_after(LifecycleOperation::Flush, delay)
    }

    /// Replace the completion handler. Only the last one registered is called.
    pub fn set_event_handler<H>(&self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.scheduler.set_event_handler(Arc::new(handler));
    }

    pub fn clear_event_handler(&self) {
        self.scheduler.clear_event_handler();
    }

    fn submit(&self, operation: LifecycleOperation) -> LifecycleTicket {
        tracing::debug!(provider = ?self, %operation, "lifecycle operation requested");
        self.scheduler.submit_now(operation)
    }
}

impl std::fmt::Debug for CacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProvider")
            .field("worker", &self.scheduler.worker().name())
            .field("default_flush_delay", &self.default_flush_delay)
            .finish()
    }
}
