//! In-memory source store
//!
//! Clones share the same underlying records, so a test (or an embedding
//! application) can keep a handle and mutate the store while the engine owns
//! another clone.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::SourceStore;
use crate::error::{ArchiveError, ArchiveResult};
use crate::models::Record;
use crate::storage::file_io::write_json_atomic;

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<String, Record>,
    unavailable: Option<String>,
}

/// Shared in-memory store keyed by record id
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<RwLock<Inner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `records`
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let source = Self::new();
        for record in records {
            source.upsert(record);
        }
        source
    }

    /// Insert or replace a record
    pub fn upsert(&self, record: Record) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.records.insert(record.id.clone(), record);
    }

    /// Make every read fail with `SourceUnavailable` until cleared
    pub fn set_unavailable(&self, reason: Option<&str>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.unavailable = reason.map(str::to_string);
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_filtered(&self, keep: impl Fn(&Record) -> bool) -> ArchiveResult<Vec<Record>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        if let Some(reason) = &inner.unavailable {
            return Err(ArchiveError::SourceUnavailable(reason.clone()));
        }
        Ok(inner.records.values().filter(|r| keep(r)).cloned().collect())
    }
}

impl SourceStore for MemorySource {
    fn all_records(&self) -> ArchiveResult<Vec<Record>> {
        self.read_filtered(|_| true)
    }

    fn records_since(&self, since: DateTime<Utc>) -> ArchiveResult<Vec<Record>> {
        self.read_filtered(|r| r.modified_after(since))
    }

    fn snapshot_to(&self, dest: &Path) -> ArchiveResult<()> {
        let records = self.all_records()?;
        write_json_atomic(dest, &records)
    }
}
