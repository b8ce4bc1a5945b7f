//! Disk cache provider
//!
//! Manages the lifecycle (open, close, flush) of a persistent key/value
//! disk cache. Lifecycle operations are serialized onto one worker thread
//! and never overlap; entry reads and writes run on the caller's thread.
//! Bursts of delayed flush requests collapse into a single flush, and a
//! registered handler is told when each lifecycle operation completes.

pub mod config;
pub mod event;
pub mod mock;
pub mod operation;
pub mod provider;
pub mod scheduler;
pub mod worker;

pub use config::{ConfigError, ProviderConfig};
pub use event::EventHandler;
pub use operation::{LifecycleOperation, TaskState};
pub use provider::{CacheProvider, ProviderError};
pub use scheduler::{LifecycleError, LifecycleScheduler, LifecycleTicket};
pub use worker::{Worker, WorkerHandle};

pub use disk_cache_api::{CacheEditor, CacheEntry, CacheIoError, CacheIoResult, DiskCache};
