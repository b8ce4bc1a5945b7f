//! Directory-backed LRU disk cache
//!
//! Layout: `<dir>/journal.json` and one `<sha256(key)>.<uuid>.entry` file
//! per committed version. Commits write a temp file and rename it to a fresh
//! name; the journal is rewritten on flush and close. A replaced version's
//! file is only deleted once a journal no longer referencing it is on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use disk_cache_api::{CacheEditor, CacheEntry, CacheIoError, CacheIoResult, DiskCache, StringEntry};

use crate::config::LruConfig;
use crate::index::{entry_file_name, Journal, LruIndex, ENTRY_SUFFIX, JOURNAL_FILENAME, TEMP_SUFFIX};

/// State that only exists while the cache is open.
struct OpenState {
    index: LruIndex,
    dirty: bool,
    /// Files of overwritten versions the last journal may still reference.
    retired: Vec<String>,
}

struct Inner {
    config: LruConfig,
    state: Mutex<Option<OpenState>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, Option<OpenState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dir(&self) -> &Path {
        &self.config.directory
    }

    fn write_journal(&self, state: &mut OpenState) -> CacheIoResult<()> {
        if !state.dirty {
            return Ok(());
        }
        state
            .index
            .to_journal(self.config.app_version, self.config.capacity_bytes)
            .write_atomic(self.dir())?;
        state.dirty = false;
        for file in state.retired.drain(..) {
            self.remove_file_logged(&file);
        }
        Ok(())
    }

    fn remove_file_logged(&self, file: &str) {
        let path = self.dir().join(file);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove cache file");
            }
        }
    }

    fn commit(&self, key: &str, value: &str) -> CacheIoResult<()> {
        let size = value.len() as u64;
        if size > self.config.capacity_bytes {
            return Err(CacheIoError::EntryTooLarge {
                size,
                capacity: self.config.capacity_bytes,
            });
        }

        let file = entry_file_name(key);
        let tmp_path = self.dir().join(format!("{}{}", file, TEMP_SUFFIX));

        if self.state().is_none() {
            return Err(CacheIoError::NotOpen);
        }
        fs::write(&tmp_path, value.as_bytes())?;

        let mut guard = self.state();
        let state = match guard.as_mut() {
            Some(state) => state,
            None => {
                drop(guard);
                let _ = fs::remove_file(&tmp_path);
                return Err(CacheIoError::NotOpen);
            }
        };

        if let Err(e) = fs::rename(&tmp_path, self.dir().join(&file)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        if let Some(previous) = state.index.insert(key, file, size) {
            state.retired.push(previous.file);
        }
        for (evicted_key, record) in state.index.evict_to_fit(self.config.capacity_bytes) {
            tracing::debug!(key = %evicted_key, size_bytes = record.size_bytes, "evicted cache entry");
            self.remove_file_logged(&record.file);
        }
        state.dirty = true;
        Ok(())
    }
}

/// Persistent LRU cache over a single directory, bounded by total payload
/// size.
#[derive(Clone)]
pub struct LruDiskCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LruDiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruDiskCache")
            .field("directory", &self.inner.config.directory)
            .field("capacity_bytes", &self.inner.config.capacity_bytes)
            .field("open", &self.is_open())
            .finish()
    }
}

impl LruDiskCache {
    /// Create a closed cache over `directory`, bounded at `capacity_bytes`.
    pub fn new(directory: impl Into<PathBuf>, capacity_bytes: u64) -> Self {
        Self::with_config(LruConfig::new(directory, capacity_bytes))
    }

    pub fn with_config(config: LruConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &LruConfig {
        &self.inner.config
    }

    pub fn directory(&self) -> &Path {
        self.inner.dir()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.inner.config.capacity_bytes
    }

    pub fn is_open(&self) -> bool {
        self.inner.state().is_some()
    }

    /// Number of stored entries, or 0 while closed.
    pub fn len(&self) -> usize {
        self.inner.state().as_ref().map(|s| s.index.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes stored, or 0 while closed.
    pub fn size_bytes(&self) -> u64 {
        self.inner
            .state()
            .as_ref()
            .map(|s| s.index.total_bytes())
            .unwrap_or(0)
    }

    /// Remove `key`. Returns whether it was stored.
    pub fn remove(&self, key: &str) -> CacheIoResult<bool> {
        let mut guard = self.inner.state();
        let state = guard.as_mut().ok_or(CacheIoError::NotOpen)?;
        match state.index.remove(key) {
            Some(record) => {
                self.inner.remove_file_logged(&record.file);
                state.dirty = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load the journal, falling back to an empty index when it cannot be
    /// trusted.
    fn load_index(&self) -> CacheIoResult<(LruIndex, bool)> {
        let dir = self.inner.dir();
        let expected = self.inner.config.app_version;

        match Journal::load(&dir.join(JOURNAL_FILENAME)) {
            Ok(Some(journal)) if journal.app_version == expected => {
                Ok((LruIndex::from_journal(journal), false))
            }
            Ok(Some(journal)) => {
                tracing::warn!(
                    dir = %dir.display(),
                    "{}; discarding stored entries",
                    CacheIoError::VersionMismatch { expected, found: journal.app_version }
                );
                Ok((LruIndex::new(), true))
            }
            Ok(None) => Ok((LruIndex::new(), false)),
            Err(e @ (CacheIoError::Serialization(_) | CacheIoError::Corrupt(_))) => {
                tracing::warn!(dir = %dir.display(), error = %e, "unreadable journal; discarding stored entries");
                Ok((LruIndex::new(), true))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete payload and temp files the index does not reference.
    fn remove_orphans(&self, index: &LruIndex) -> CacheIoResult<usize> {
        let referenced: std::collections::HashSet<&str> = index.files().collect();
        let mut removed = 0;

        for dir_entry in fs::read_dir(self.inner.dir())? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            let stale_entry = name.ends_with(ENTRY_SUFFIX) && !referenced.contains(name);
            if stale_entry || name.ends_with(TEMP_SUFFIX) {
                self.inner.remove_file_logged(name);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl DiskCache for LruDiskCache {
    fn open(&self) -> CacheIoResult<()> {
        let mut guard = self.inner.state();
        if guard.is_some() {
            return Ok(());
        }

        let dir = self.inner.dir();
        fs::create_dir_all(dir)?;

        let (mut index, mut dirty) = self.load_index()?;

        let missing = index.retain_existing(|record| dir.join(&record.file).is_file());
        if !missing.is_empty() {
            tracing::warn!(count = missing.len(), "dropped index records with missing payloads");
            dirty = true;
        }

        let orphans = self.remove_orphans(&index)?;
        if orphans > 0 {
            tracing::debug!(count = orphans, "removed orphaned cache files");
        }

        for (_, record) in index.evict_to_fit(self.inner.config.capacity_bytes) {
            self.inner.remove_file_logged(&record.file);
            dirty = true;
        }

        tracing::info!(
            dir = %dir.display(),
            entries = index.len(),
            size_bytes = index.total_bytes(),
            capacity_bytes = self.inner.config.capacity_bytes,
            "disk cache opened"
        );

        *guard = Some(OpenState {
            index,
            dirty,
            retired: Vec::new(),
        });
        Ok(())
    }

    fn close(&self) -> CacheIoResult<()> {
        let mut guard = self.inner.state();
        let state = match guard.as_mut() {
            Some(state) => state,
            None => return Ok(()),
        };
        self.inner.write_journal(state)?;
        *guard = None;
        tracing::info!(dir = %self.inner.dir().display(), "disk cache closed");
        Ok(())
    }

    fn flush(&self) -> CacheIoResult<()> {
        let mut guard = self.inner.state();
        let state = guard.as_mut().ok_or(CacheIoError::NotOpen)?;
        self.inner.write_journal(state)
    }

    fn begin_edit(&self, key: &str) -> CacheIoResult<Box<dyn CacheEditor>> {
        if !self.is_open() {
            return Err(CacheIoError::NotOpen);
        }
        Ok(Box::new(LruEditor {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            value: String::new(),
        }))
    }

    fn get_entry(&self, key: &str) -> CacheIoResult<Option<Box<dyn CacheEntry>>> {
        let mut guard = self.inner.state();
        let state = guard.as_mut().ok_or(CacheIoError::NotOpen)?;

        let file = match state.index.get(key) {
            Some(record) => record.file.clone(),
            None => return Ok(None),
        };

        match fs::read_to_string(self.inner.dir().join(&file)) {
            Ok(value) => {
                state.index.touch(key);
                state.dirty = true;
                Ok(Some(Box::new(StringEntry::new(value))))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(key, "payload file vanished; dropping entry");
                state.index.remove(key);
                state.dirty = true;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Pending write for one key.
struct LruEditor {
    inner: Arc<Inner>,
    key: String,
    value: String,
}

impl CacheEditor for LruEditor {
    fn set_string(&mut self, value: &str) {
        self.value.clear();
        self.value.push_str(value);
    }

    fn commit(self: Box<Self>) -> CacheIoResult<()> {
        self.inner.commit(&self.key, &self.value)
    }

    fn abort(self: Box<Self>) {}
}
