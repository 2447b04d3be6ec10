//! Durable index of produced artifacts
//!
//! The catalog is the ground truth for retention and incremental baselines.
//! It lives next to the artifacts as `catalog.json` and is rewritten
//! atomically after every mutation, so it stays readable without the
//! application for disaster recovery.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ArchiveResult};
use crate::models::{Artifact, ArtifactId, ArtifactKind, CatalogEntry, EntryStatus};
use crate::storage::file_io::{read_json, write_json_atomic};

/// Catalog file name inside the backup directory
pub const CATALOG_FILE: &str = "catalog.json";

const CATALOG_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    updated_at: Option<DateTime<Utc>>,
    entries: Vec<CatalogEntry>,
}

impl Default for CatalogFile {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            updated_at: None,
            entries: Vec::new(),
        }
    }
}

/// In-memory catalog bound to its file
#[derive(Debug, Clone)]
pub struct BackupCatalog {
    path: PathBuf,
    /// Oldest first
    entries: Vec<CatalogEntry>,
}

impl BackupCatalog {
    /// Load the catalog from `dir`, starting empty if none exists yet
    pub fn load(dir: &Path) -> ArchiveResult<Self> {
        let path = dir.join(CATALOG_FILE);
        let entries = Self::read_entries(&path)?;
        Ok(Self { path, entries })
    }

    fn read_entries(path: &Path) -> ArchiveResult<Vec<CatalogEntry>> {
        let file: CatalogFile = read_json(path).map_err(|e| {
            ArchiveError::Catalog(format!("Cannot read {}: {}", path.display(), e))
        })?;
        if file.version > CATALOG_VERSION {
            return Err(ArchiveError::Catalog(format!(
                "Unsupported catalog version {} (max {})",
                file.version, CATALOG_VERSION
            )));
        }
        let mut entries = file.entries;
        entries.sort_by(|a, b| {
            a.artifact
                .created_at
                .cmp(&b.artifact.created_at)
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(entries)
    }

    /// Replace in-memory state with what is on disk
    pub fn reload(&mut self) -> ArchiveResult<()> {
        self.entries = Self::read_entries(&self.path)?;
        Ok(())
    }

    /// Persist the catalog
    pub fn flush(&self) -> ArchiveResult<()> {
        let file = CatalogFile {
            version: CATALOG_VERSION,
            updated_at: Some(Utc::now()),
            entries: self.entries.clone(),
        };
        write_json_atomic(&self.path, &file)
            .map_err(|e| ArchiveError::write_failure(CATALOG_FILE, e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, oldest first
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &ArtifactId) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    fn get_mut(&mut self, id: &ArtifactId) -> ArchiveResult<&mut CatalogEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.id() == id)
            .ok_or_else(|| ArchiveError::artifact_not_found(id.as_str()))
    }

    /// Entries describing finished artifacts (verified or corrupt)
    pub fn committed(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter().filter(|e| e.status.is_committed())
    }

    /// Creation time of the newest entry of any status
    pub fn last_created_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.artifact.created_at).max()
    }

    /// Record the start of an artifact write
    pub fn insert_pending(&mut self, artifact: Artifact) -> ArchiveResult<()> {
        if self.get(&artifact.id).is_some() {
            return Err(ArchiveError::Duplicate {
                entity_type: "Artifact",
                identifier: artifact.id.to_string(),
            });
        }
        self.entries.push(CatalogEntry::pending(artifact));
        Ok(())
    }

    pub fn mark_verified(&mut self, id: &ArtifactId, at: DateTime<Utc>) -> ArchiveResult<()> {
        let entry = self.get_mut(id)?;
        entry.status = EntryStatus::Verified;
        entry.verified_at = Some(at);
        Ok(())
    }

    pub fn mark_failed(&mut self, id: &ArtifactId) -> ArchiveResult<()> {
        self.get_mut(id)?.status = EntryStatus::Failed;
        Ok(())
    }

    pub fn mark_corrupt(&mut self, id: &ArtifactId) -> ArchiveResult<()> {
        self.get_mut(id)?.status = EntryStatus::Corrupt;
        Ok(())
    }

    /// Drop an entry, returning it
    pub fn remove(&mut self, id: &ArtifactId) -> ArchiveResult<CatalogEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.id() == id)
            .ok_or_else(|| ArchiveError::artifact_not_found(id.as_str()))?;
        Ok(self.entries.remove(pos))
    }

    /// Full backup at the root of `id`'s chain, if the chain is intact
    pub fn chain_root(&self, id: &ArtifactId) -> Option<&CatalogEntry> {
        self.ancestry(id).and_then(|chain| chain.into_iter().next())
    }

    /// The chain from its root full backup down to `id`, inclusive
    ///
    /// `None` when an ancestor is missing from the catalog.
    pub fn ancestry(&self, id: &ArtifactId) -> Option<Vec<&CatalogEntry>> {
        let mut chain = Vec::new();
        let mut current = self.get(id)?;
        loop {
            chain.push(current);
            if current.artifact.kind == ArtifactKind::Full {
                break;
            }
            if chain.len() > self.entries.len() {
                return None;
            }
            current = self.get(current.artifact.baseline.as_ref()?)?;
        }
        chain.reverse();
        Some(chain)
    }

    /// Verified, with a fully verified ancestry down from a present full backup
    pub fn is_healthy(&self, id: &ArtifactId) -> bool {
        self.ancestry(id)
            .is_some_and(|chain| chain.iter().all(|e| e.status == EntryStatus::Verified))
    }

    /// Newest healthy artifact
    pub fn latest_healthy(&self) -> Option<&CatalogEntry> {
        self.latest_healthy_where(|_| true)
    }

    /// Newest healthy artifact whose whole chain also satisfies `usable`
    pub fn latest_healthy_where(
        &self,
        usable: impl Fn(&CatalogEntry) -> bool,
    ) -> Option<&CatalogEntry> {
        self.entries.iter().rev().find(|e| {
            self.ancestry(e.id()).is_some_and(|chain| {
                chain
                    .iter()
                    .all(|m| m.status == EntryStatus::Verified && usable(m))
            })
        })
    }

    /// Cloned view for readers
    pub fn snapshot(&self) -> Vec<CatalogEntry> {
        self.entries.clone()
    }
}
