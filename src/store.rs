//! Progress-store collaborator: the trait boundary plus the shipped
//! implementations. The engine only ever reads one record per (user, book)
//! and upserts it; records are never deleted here.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Fault;

/// Server-side progress record, unique per (user, book). Created lazily on
/// first read, mutated on every page change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub user_id: u64,
    pub book_id: u64,
    pub current_page: u32,
    pub total_pages: u32,
    pub percentage: u8,
    pub completed: bool,
    pub last_read_at: DateTime<Utc>,
}

/// Remote progress store at its interface boundary: one read, one idempotent
/// upsert. Implementations are shared with the writer thread, so calls take
/// `&self` and synchronize internally.
pub trait ProgressStore: Send + Sync {
    fn get(&self, user_id: u64, book_id: u64) -> Result<Option<ProgressRecord>, Fault>;

    /// Upsert keyed by `(record.user_id, record.book_id)`; returns the
    /// stored record.
    fn put(&self, record: &ProgressRecord) -> Result<ProgressRecord, Fault>;
}

/// In-memory store. The default collaborator for tests and offline use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(u64, u64), ProgressRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(u64, u64), ProgressRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProgressStore for MemoryStore {
    fn get(&self, user_id: u64, book_id: u64) -> Result<Option<ProgressRecord>, Fault> {
        Ok(self.lock().get(&(user_id, book_id)).cloned())
    }

    fn put(&self, record: &ProgressRecord) -> Result<ProgressRecord, Fault> {
        self.lock()
            .insert((record.user_id, record.book_id), record.clone());
        Ok(record.clone())
    }
}

/// Progress records persisted as one pretty-printed JSON file, keyed
/// `"user:book"`. Suitable as a local fallback store.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn key(user_id: u64, book_id: u64) -> String {
        format!("{}:{}", user_id, book_id)
    }

    fn load(&self) -> anyhow::Result<HashMap<String, ProgressRecord>> {
        if !Path::new(&self.path).exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", self.path.display()))
    }

    fn save(&self, records: &HashMap<String, ProgressRecord>) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(records)?;
        fs::write(&self.path, content)
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

impl ProgressStore for JsonFileStore {
    fn get(&self, user_id: u64, book_id: u64) -> Result<Option<ProgressRecord>, Fault> {
        let records = self
            .load()
            .map_err(|e| Fault::progress_write(format!("{e:#}")))?;
        Ok(records.get(&Self::key(user_id, book_id)).cloned())
    }

    fn put(&self, record: &ProgressRecord) -> Result<ProgressRecord, Fault> {
        let mut records = self
            .load()
            .map_err(|e| Fault::progress_write(format!("{e:#}")))?;
        records.insert(Self::key(record.user_id, record.book_id), record.clone());
        self.save(&records)
            .map_err(|e| Fault::progress_write(format!("{e:#}")))?;
        Ok(record.clone())
    }
}
