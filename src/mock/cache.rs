//! In-memory `DiskCache` double.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use disk_cache_api::{CacheEditor, CacheEntry, CacheIoError, CacheIoResult, DiskCache, StringEntry};

use super::failure::{FailureConfig, FailureInjector};
use super::CacheCall;

type Hook = Arc<dyn Fn() + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MockInner {
    open: AtomicBool,
    entries: Mutex<HashMap<String, String>>,
    /// Snapshot of `entries` taken by the last successful flush or close.
    durable: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<CacheCall>>,
    injector: Mutex<FailureInjector>,
    hooks: Mutex<HashMap<CacheCall, Hook>>,
    active_lifecycle: AtomicUsize,
    max_concurrent_lifecycle: AtomicUsize,
}

impl MockInner {
    /// Record `call`, run its hook, apply injected delay and error.
    fn intercept(&self, call: CacheCall) -> CacheIoResult<()> {
        lock(&self.calls).push(call);

        let hook = lock(&self.hooks).get(&call).cloned();
        if let Some(hook) = hook {
            hook();
        }

        let outcome = lock(&self.injector).check(call);
        if let Some(delay) = outcome.delay {
            thread::sleep(delay);
        }
        match outcome.error_message {
            Some(message) => Err(CacheIoError::other(message)),
            None => Ok(()),
        }
    }

    fn require_open(&self) -> CacheIoResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheIoError::NotOpen)
        }
    }

    fn lifecycle<F>(&self, call: CacheCall, apply: F) -> CacheIoResult<()>
    where
        F: FnOnce(&Self) -> CacheIoResult<()>,
    {
        let active = self.active_lifecycle.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_lifecycle.fetch_max(active, Ordering::SeqCst);

        let result = self.intercept(call).and_then(|()| apply(self));

        self.active_lifecycle.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn snapshot_durable(&self) {
        let entries = lock(&self.entries).clone();
        *lock(&self.durable) = entries;
    }
}

/// In-memory disk cache that records every call and supports failure and
/// delay injection.
///
/// Entry calls fail with `NotOpen` unless the cache has been opened.
#[derive(Clone, Default)]
pub struct MockDiskCache {
    inner: Arc<MockInner>,
}

impl MockDiskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that starts out open.
    pub fn opened() -> Self {
        let mock = Self::new();
        mock.inner.open.store(true, Ordering::SeqCst);
        mock
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<CacheCall> {
        lock(&self.inner.calls).clone()
    }

    pub fn count(&self, call: CacheCall) -> usize {
        lock(&self.inner.calls).iter().filter(|c| **c == call).count()
    }

    /// Highest number of open/close/flush calls seen running at once.
    pub fn max_concurrent_lifecycle(&self) -> usize {
        self.inner.max_concurrent_lifecycle.load(Ordering::SeqCst)
    }

    /// Current committed value of `key`, bypassing call recording.
    pub fn get(&self, key: &str) -> Option<String> {
        lock(&self.inner.entries).get(key).cloned()
    }

    /// Value of `key` as of the last successful flush or close.
    pub fn durable(&self, key: &str) -> Option<String> {
        lock(&self.inner.durable).get(key).cloned()
    }

    pub fn inject(&self, call: CacheCall, config: FailureConfig) {
        lock(&self.inner.injector).inject(call, config);
    }

    pub fn inject_error(&self, call: CacheCall, message: impl Into<String>) {
        self.inject(call, FailureConfig::error(message));
    }

    pub fn inject_delay(&self, call: CacheCall, delay: std::time::Duration) {
        self.inject(call, FailureConfig::delay(delay));
    }

    pub fn clear_failures(&self) {
        lock(&self.inner.injector).clear();
    }

    /// Run `hook` at the start of every `call`, before injected delays.
    pub fn on_call<F>(&self, call: CacheCall, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.inner.hooks).insert(call, Arc::new(hook));
    }
}

impl std::fmt::Debug for MockDiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDiskCache")
            .field("open", &self.is_open())
            .field("calls", &self.calls().len())
            .finish()
    }
}

impl DiskCache for MockDiskCache {
    fn open(&self) -> CacheIoResult<()> {
        self.inner.lifecycle(CacheCall::Open, |inner| {
            inner.open.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close(&self) -> CacheIoResult<()> {
        self.inner.lifecycle(CacheCall::Close, |inner| {
            if inner.open.swap(false, Ordering::SeqCst) {
                inner.snapshot_durable();
            }
            Ok(())
        })
    }

    fn flush(&self) -> CacheIoResult<()> {
        self.inner.lifecycle(CacheCall::Flush, |inner| {
            inner.require_open()?;
            inner.snapshot_durable();
            Ok(())
        })
    }

    fn begin_edit(&self, key: &str) -> CacheIoResult<Box<dyn CacheEditor>> {
        self.inner.intercept(CacheCall::BeginEdit)?;
        self.inner.require_open()?;
        Ok(Box::new(MockEditor {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            value: String::new(),
        }))
    }

    fn get_entry(&self, key: &str) -> CacheIoResult<Option<Box<dyn CacheEntry>>> {
        self.inner.intercept(CacheCall::GetEntry)?;
        self.inner.require_open()?;
        Ok(lock(&self.inner.entries)
            .get(key)
            .map(|value| Box::new(StringEntry::new(value.clone())) as Box<dyn CacheEntry>))
    }
}

struct MockEditor {
    inner: Arc<MockInner>,
    key: String,
    value: String,
}

impl CacheEditor for MockEditor {
    fn set_string(&mut self, value: &str) {
        self.value = value.to_string();
    }

    fn commit(self: Box<Self>) -> CacheIoResult<()> {
        self.inner.intercept(CacheCall::Commit)?;
        self.inner.require_open()?;
        lock(&self.inner.entries).insert(self.key, self.value);
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(cache: &MockDiskCache, key: &str, value: &str) -> CacheIoResult<()> {
        let mut editor = cache.begin_edit(key)?;
        editor.set_string(value);
        editor.commit()
    }

    #[test]
    fn test_requires_open_for_entries() {
        let cache = MockDiskCache::new();
        assert!(matches!(put(&cache, "a", "1"), Err(CacheIoError::NotOpen)));
        assert!(matches!(cache.get_entry("a"), Err(CacheIoError::NotOpen)));
    }

    #[test]
    fn test_round_trip_and_durability() {
        let cache = MockDiskCache::new();
        cache.open().unwrap();
        put(&cache, "a", "1").unwrap();

        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert_eq!(cache.durable("a"), None);

        cache.flush().unwrap();
        assert_eq!(cache.durable("a").as_deref(), Some("1"));
    }

    #[test]
    fn test_records_calls_in_order() {
        let cache = MockDiskCache::opened();
        put(&cache, "k", "v").unwrap();
        let _ = cache.get_entry("k").unwrap();
        cache.close().unwrap();

        assert_eq!(
            cache.calls(),
            vec![
                CacheCall::BeginEdit,
                CacheCall::Commit,
                CacheCall::GetEntry,
                CacheCall::Close
            ]
        );
    }

    #[test]
    fn test_injected_error_on_commit() {
        let cache = MockDiskCache::opened();
        cache.inject_error(CacheCall::Commit, "disk full");
        let err = put(&cache, "a", "1").unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_tracks_lifecycle_overlap() {
        let cache = MockDiskCache::new();
        cache.open().unwrap();
        cache.flush().unwrap();
        assert_eq!(cache.max_concurrent_lifecycle(), 1);
    }

    #[test]
    fn test_hook_runs_on_call() {
        let cache = MockDiskCache::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        cache.on_call(CacheCall::Open, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        cache.open().unwrap();
        cache.open().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
