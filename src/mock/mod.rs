//! Mock disk cache
//!
//! An in-memory `DiskCache` for exercising the provider and scheduler
//! without touching the filesystem. Every call is recorded, and errors or
//! delays can be injected per call kind to drive failure paths and to
//! observe whether lifecycle operations ever overlap.

mod cache;
mod failure;

pub use cache::MockDiskCache;
pub use failure::{FailureConfig, FailureInjector, InjectedOutcome};

/// Kinds of calls the mock intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCall {
    Open,
    Close,
    Flush,
    BeginEdit,
    Commit,
    GetEntry,
}
