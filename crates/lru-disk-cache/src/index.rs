//! LRU index and its on-disk journal
//!
//! The index tracks every stored entry, its payload size and its recency.
//! It is persisted as `journal.json` in the cache directory, with records
//! ordered from least to most recently used so reloading restores the same
//! eviction order.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use disk_cache_api::{CacheIoError, CacheIoResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Schema version for journal.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "lru-disk-cache/journal@1";

/// Journal file name inside the cache directory.
pub const JOURNAL_FILENAME: &str = "journal.json";

/// Suffix for committed payload files.
pub const ENTRY_SUFFIX: &str = ".entry";

/// Suffix for in-progress writes.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Hex SHA-256 of a key. Every payload file for the key starts with it.
pub fn key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Fresh payload file name for one committed version of `key`.
///
/// Each commit gets its own file, so a journaled file is never overwritten
/// and its recorded size stays true across a crash.
pub fn entry_file_name(key: &str) -> String {
    format!("{}.{}{}", key_digest(key), uuid::Uuid::new_v4().simple(), ENTRY_SUFFIX)
}

/// Persisted form of the index (journal.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    pub schema_version: u32,
    pub schema_id: String,
    /// Application format tag; a mismatch discards the cache contents.
    pub app_version: u32,
    pub capacity_bytes: u64,
    pub written_at: DateTime<Utc>,
    /// Least recently used first.
    pub entries: Vec<JournalRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub key: String,
    pub file: String,
    pub size_bytes: u64,
    pub last_accessed: DateTime<Utc>,
}

impl Journal {
    /// Load the journal at `path`. A missing file yields `Ok(None)`.
    pub fn load(path: &Path) -> CacheIoResult<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let journal: Journal = serde_json::from_str(&content)?;
        if journal.schema_version != SCHEMA_VERSION {
            return Err(CacheIoError::Corrupt(format!(
                "unsupported journal schema_version {}",
                journal.schema_version
            )));
        }
        Ok(Some(journal))
    }

    /// Write the journal into `dir` via a temp file and rename.
    pub fn write_atomic(&self, dir: &Path) -> CacheIoResult<()> {
        let final_path = dir.join(JOURNAL_FILENAME);
        let tmp_path = dir.join(format!("{}{}", JOURNAL_FILENAME, TEMP_SUFFIX));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

/// One indexed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub file: String,
    pub size_bytes: u64,
    pub last_accessed: DateTime<Utc>,
    tick: u64,
}

/// In-memory LRU index.
#[derive(Debug, Default)]
pub struct LruIndex {
    records: HashMap<String, IndexRecord>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, String>,
    next_tick: u64,
    total_bytes: u64,
}

impl LruIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a journal, preserving its recency order.
    pub fn from_journal(journal: Journal) -> Self {
        let mut index = Self::new();
        for record in journal.entries {
            index.insert_at(record.key, record.file, record.size_bytes, record.last_accessed);
        }
        index
    }

    /// Snapshot for persistence.
    pub fn to_journal(&self, app_version: u32, capacity_bytes: u64) -> Journal {
        let entries = self
            .order
            .values()
            .filter_map(|key| {
                self.records.get(key).map(|r| JournalRecord {
                    key: key.clone(),
                    file: r.file.clone(),
                    size_bytes: r.size_bytes,
                    last_accessed: r.last_accessed,
                })
            })
            .collect();

        Journal {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            app_version,
            capacity_bytes,
            written_at: Utc::now(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn get(&self, key: &str) -> Option<&IndexRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Keys from least to most recently used.
    pub fn keys_lru_order(&self) -> Vec<String> {
        self.order.values().cloned().collect()
    }

    /// Mark `key` most recently used. Returns false if it is not indexed.
    pub fn touch(&mut self, key: &str) -> bool {
        let tick = self.bump_tick();
        match self.records.get_mut(key) {
            Some(record) => {
                self.order.remove(&record.tick);
                record.tick = tick;
                record.last_accessed = Utc::now();
                self.order.insert(tick, key.to_string());
                true
            }
            None => false,
        }
    }

    /// Insert or replace `key` as most recently used.
    ///
    /// Returns the replaced record, if any.
    pub fn insert(&mut self, key: &str, file: String, size_bytes: u64) -> Option<IndexRecord> {
        let previous = self.remove(key);
        self.insert_at(key.to_string(), file, size_bytes, Utc::now());
        previous
    }

    pub fn remove(&mut self, key: &str) -> Option<IndexRecord> {
        let record = self.records.remove(key)?;
        self.order.remove(&record.tick);
        self.total_bytes -= record.size_bytes;
        Some(record)
    }

    /// Evict least recently used entries until the total fits `capacity_bytes`.
    ///
    /// Returns the evicted keys with their records, oldest first.
    pub fn evict_to_fit(&mut self, capacity_bytes: u64) -> Vec<(String, IndexRecord)> {
        let mut evicted = Vec::new();
        while self.total_bytes > capacity_bytes {
            let oldest = match self.order.values().next() {
                Some(key) => key.clone(),
                None => break,
            };
            if let Some(record) = self.remove(&oldest) {
                evicted.push((oldest, record));
            }
        }
        evicted
    }

    /// Drop records for which `exists` returns false. Returns the dropped keys.
    pub fn retain_existing<F>(&mut self, mut exists: F) -> Vec<String>
    where
        F: FnMut(&IndexRecord) -> bool,
    {
        let missing: Vec<String> = self
            .records
            .iter()
            .filter(|(_, record)| !exists(record))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &missing {
            self.remove(key);
        }
        missing
    }

    /// Iterate over the payload file names currently referenced.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.records.values().map(|r| r.file.as_str())
    }

    fn insert_at(&mut self, key: String, file: String, size_bytes: u64, last_accessed: DateTime<Utc>) {
        if self.records.contains_key(&key) {
            self.remove(&key);
        }
        let tick = self.bump_tick();
        self.order.insert(tick, key.clone());
        self.total_bytes += size_bytes;
        self.records.insert(
            key,
            IndexRecord {
                file,
                size_bytes,
                last_accessed,
                tick,
            },
        );
    }

    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }
}
