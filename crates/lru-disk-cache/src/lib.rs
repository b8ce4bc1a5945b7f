//! LRU Disk Cache
//!
//! Default `DiskCache` implementation: one directory, a JSON journal for the
//! LRU index, one payload file per key, and eviction by total payload size.
//!
//! Only the cache provider's factory picks this implementation; everything
//! else talks to the `disk_cache_api::DiskCache` trait.

mod cache;
mod config;
pub mod index;

pub use cache::LruDiskCache;
pub use config::LruConfig;
pub use index::{Journal, JournalRecord, LruIndex};

/// Fixed format tag written into every journal by this crate.
pub const APP_VERSION: u32 = 1;
