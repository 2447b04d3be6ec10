//! Backup engine
//!
//! Orchestrates full and incremental backup creation, verification and
//! retention over one backup directory. Every mutating call holds the
//! directory's exclusive lock for its whole duration and reloads the catalog
//! first; read-only calls hold a shared lock.
//!
//! Creation protocol: a `Pending` catalog entry is flushed before the
//! artifact file is written; the entry becomes `Verified` only after the file
//! has been re-read, checksummed and decoded. On any failure the file is
//! deleted and the entry is marked `Failed` and then removed, so no pending or
//! failed entry outlives the call.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use super::catalog::{BackupCatalog, CATALOG_FILE};
use super::codec;
use super::lock::{DirLock, LOCK_FILE};
use super::restore::{self, RestoreResult};
use super::retention::{self, RetentionConfig};
use crate::error::{ArchiveError, ArchiveResult};
use crate::models::{Artifact, ArtifactId, ArtifactKind, CatalogEntry, EntryStatus, Record};
use crate::source::SourceStore;
use crate::storage::file_io::{remove_if_exists, write_bytes_synced, TEMP_SUFFIX};

/// Engine construction options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub backup_dir: PathBuf,
    pub compress: bool,
}

impl EngineOptions {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            compress: true,
        }
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }
}

/// Outcome of verifying a stored artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    Corrupt { reason: String },
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerifyOutcome::Verified)
    }
}

/// One artifact retention could not remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub artifact: ArtifactId,
    pub reason: String,
}

impl DeleteFailure {
    pub fn to_error(&self) -> ArchiveError {
        ArchiveError::RetentionDeleteFailure {
            artifact: self.artifact.to_string(),
            reason: self.reason.clone(),
        }
    }
}

/// Result of a retention pass; partial success is normal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: Vec<ArtifactId>,
    pub failed: Vec<DeleteFailure>,
}

impl RetentionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What the startup sweep cleaned up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Pending or failed entries dropped from the catalog
    pub discarded_entries: Vec<ArtifactId>,
    /// Files removed because no committed entry owns them
    pub removed_files: Vec<String>,
    /// Committed entries whose file is gone; verified ones are now corrupt
    pub missing_files: Vec<ArtifactId>,
    /// Pending or failed entries kept because their file could not be removed
    pub stuck_entries: Vec<ArtifactId>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.discarded_entries.is_empty()
            && self.removed_files.is_empty()
            && self.missing_files.is_empty()
            && self.stuck_entries.is_empty()
    }
}

/// Summary over the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupStats {
    pub total_artifacts: usize,
    pub full_count: usize,
    pub incremental_count: usize,
    pub verified_count: usize,
    pub corrupt_count: usize,
    pub total_bytes: u64,
    pub oldest: Option<(ArtifactId, DateTime<Utc>)>,
    pub newest: Option<(ArtifactId, DateTime<Utc>)>,
    /// Record count of the newest full backup
    pub latest_full_records: Option<usize>,
}

/// When an artifact was created, and when its records were read
#[derive(Debug, Clone, Copy)]
struct Stamp {
    created_at: DateTime<Utc>,
    captured_at: DateTime<Utc>,
}

/// Backup engine over one source and one backup directory
pub struct BackupEngine<S: SourceStore> {
    source: S,
    backup_dir: PathBuf,
    compress: bool,
    catalog: BackupCatalog,
    recovery: RecoveryReport,
    #[cfg(test)]
    fault: Option<InjectedFault>,
}

/// Failure to simulate in the artifact write step
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
enum InjectedFault {
    /// Half the bytes land, then the write errors
    Write,
    /// The write succeeds with one byte flipped
    Corruption,
}

impl<S: SourceStore> BackupEngine<S> {
    /// Open the backup directory, creating it if needed, and run recovery
    pub fn open(source: S, options: EngineOptions) -> ArchiveResult<Self> {
        fs::create_dir_all(&options.backup_dir).map_err(|e| {
            ArchiveError::write_failure(
                options.backup_dir.display().to_string(),
                format!("cannot create backup directory: {}", e),
            )
        })?;

        let catalog = BackupCatalog::load(&options.backup_dir)?;
        let mut engine = Self {
            source,
            backup_dir: options.backup_dir,
            compress: options.compress,
            catalog,
            recovery: RecoveryReport::default(),
            #[cfg(test)]
            fault: None,
        };
        engine.recovery = engine.recover()?;
        Ok(engine)
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Catalog as of the last operation
    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    /// What the sweep in [`BackupEngine::open`] cleaned up
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    fn artifact_path(&self, artifact: &Artifact) -> PathBuf {
        self.backup_dir.join(&artifact.file_name)
    }

    /// Discard anything an interrupted run left behind
    pub fn recover(&mut self) -> ArchiveResult<RecoveryReport> {
        let _lock = DirLock::exclusive(&self.backup_dir)?;
        self.catalog.reload()?;

        let mut report = RecoveryReport::default();
        // Stray files go before the first flush, which replaces catalog.json.tmp
        self.sweep_stray_files(&mut report)?;

        let stale: Vec<Artifact> = self
            .catalog
            .entries()
            .iter()
            .filter(|e| !e.status.is_committed())
            .map(|e| e.artifact.clone())
            .collect();
        for artifact in stale {
            match remove_if_exists(&self.artifact_path(&artifact)) {
                Ok(_) => {
                    self.catalog.remove(&artifact.id)?;
                    warn!(artifact_id = %artifact.id, phase = "recovery", "discarded unfinished artifact");
                    report.discarded_entries.push(artifact.id);
                }
                Err(e) => {
                    error!(artifact_id = %artifact.id, phase = "recovery", error = %e, "cannot remove unfinished artifact");
                    report.stuck_entries.push(artifact.id);
                }
            }
        }

        let missing: Vec<(ArtifactId, EntryStatus)> = self
            .catalog
            .committed()
            .filter(|e| !self.artifact_path(&e.artifact).exists())
            .map(|e| (e.id().clone(), e.status))
            .collect();
        let mut flagged = false;
        for (id, status) in missing {
            warn!(artifact_id = %id, phase = "recovery", "artifact file is missing");
            if status == EntryStatus::Verified {
                self.catalog.mark_corrupt(&id)?;
                flagged = true;
            }
            report.missing_files.push(id);
        }

        if flagged || !report.discarded_entries.is_empty() {
            self.catalog.flush()?;
        }

        if report.is_clean() {
            debug!(dir = %self.backup_dir.display(), "recovery sweep found nothing to do");
        }
        Ok(report)
    }

    /// Remove leftover temp files and artifact files no entry owns
    fn sweep_stray_files(&self, report: &mut RecoveryReport) -> ArchiveResult<()> {
        let dir_entries = fs::read_dir(&self.backup_dir).map_err(|e| {
            ArchiveError::Io(format!("Failed to read backup directory: {}", e))
        })?;
        for dir_entry in dir_entries {
            let dir_entry = dir_entry
                .map_err(|e| ArchiveError::Io(format!("Failed to read directory entry: {}", e)))?;
            if !dir_entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = dir_entry.file_name().to_string_lossy().to_string();
            if name == CATALOG_FILE || name == LOCK_FILE {
                continue;
            }

            let leftover_temp = name.ends_with(&format!(".{}", TEMP_SUFFIX));
            let unowned = name
                .parse::<ArtifactId>()
                .ok()
                .is_some_and(|id| self.catalog.get(&id).is_none());
            if !(leftover_temp || unowned) {
                continue;
            }

            match fs::remove_file(dir_entry.path()) {
                Ok(()) => {
                    warn!(file = %name, phase = "recovery", "removed orphaned file");
                    report.removed_files.push(name);
                }
                Err(e) => {
                    error!(file = %name, phase = "recovery", error = %e, "cannot remove orphaned file");
                }
            }
        }
        Ok(())
    }

    /// Back up every record in the source
    pub fn create_full(&mut self) -> ArchiveResult<Artifact> {
        let _lock = DirLock::exclusive(&self.backup_dir)?;
        self.catalog.reload()?;
        self.write_full()
    }

    /// Back up records changed since the newest healthy artifact
    ///
    /// Falls back to a full backup when there is no healthy baseline.
    pub fn create_incremental(&mut self) -> ArchiveResult<Artifact> {
        let _lock = DirLock::exclusive(&self.backup_dir)?;
        self.catalog.reload()?;
        self.write_incremental()
    }

    /// Create a backup of `kind`, then apply `config`
    pub fn create_backup_with_retention(
        &mut self,
        kind: ArtifactKind,
        config: &RetentionConfig,
    ) -> ArchiveResult<(Artifact, RetentionReport)> {
        config.validate()?;
        let _lock = DirLock::exclusive(&self.backup_dir)?;
        self.catalog.reload()?;

        let artifact = match kind {
            ArtifactKind::Full => self.write_full()?,
            ArtifactKind::Incremental => self.write_incremental()?,
        };
        let report = self.prune(config)?;
        Ok((artifact, report))
    }

    fn write_full(&mut self) -> ArchiveResult<Artifact> {
        let captured_at = Utc::now();
        let stamp = Stamp {
            created_at: self.next_timestamp(captured_at),
            captured_at,
        };
        let id = ArtifactId::new(ArtifactKind::Full, stamp.created_at);
        let records = self.fetch(&id, |source| source.all_records())?;
        self.write_artifact(id, ArtifactKind::Full, stamp, None, records)
    }

    fn write_incremental(&mut self) -> ArchiveResult<Artifact> {
        let Some((baseline_id, since)) = self.baseline() else {
            info!(phase = "fetch", "no healthy baseline, creating a full backup instead");
            return self.write_full();
        };

        let captured_at = Utc::now();
        let stamp = Stamp {
            created_at: self.next_timestamp(captured_at),
            captured_at,
        };
        let id = ArtifactId::new(ArtifactKind::Incremental, stamp.created_at);
        let records = self.fetch(&id, |source| source.records_since(since))?;
        debug!(artifact_id = %id, baseline = %baseline_id, changed = records.len(), "incremental selection");
        self.write_artifact(
            id,
            ArtifactKind::Incremental,
            stamp,
            Some(baseline_id),
            records,
        )
    }

    /// Newest healthy artifact whose whole chain is still on disk, with the
    /// instant its records were read
    fn baseline(&self) -> Option<(ArtifactId, DateTime<Utc>)> {
        self.catalog
            .latest_healthy_where(|e| self.artifact_path(&e.artifact).exists())
            .map(|e| (e.id().clone(), e.artifact.captured_since()))
    }

    /// Creation times strictly increase within a catalog
    fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.catalog.last_created_at() {
            Some(last) if now <= last => last + Duration::nanoseconds(1),
            _ => now,
        }
    }

    fn fetch(
        &self,
        id: &ArtifactId,
        read: impl FnOnce(&S) -> ArchiveResult<Vec<Record>>,
    ) -> ArchiveResult<Vec<Record>> {
        read(&self.source).map_err(|e| {
            error!(artifact_id = %id, phase = "fetch", error = %e, "cannot read source store");
            match e {
                ArchiveError::SourceUnavailable(_) => e,
                other => ArchiveError::SourceUnavailable(other.to_string()),
            }
        })
    }

    fn write_artifact(
        &mut self,
        id: ArtifactId,
        kind: ArtifactKind,
        stamp: Stamp,
        baseline: Option<ArtifactId>,
        records: Vec<Record>,
    ) -> ArchiveResult<Artifact> {
        let bytes = codec::encode(&records, self.compress).map_err(|e| {
            error!(artifact_id = %id, phase = "encode", error = %e, "cannot encode records");
            ArchiveError::write_failure(id.as_str(), e.to_string())
        })?;

        let artifact = Artifact {
            file_name: Artifact::file_name_for(&id, self.compress),
            id,
            kind,
            created_at: stamp.created_at,
            captured_at: Some(stamp.captured_at),
            baseline,
            compressed: self.compress,
            checksum: codec::checksum(&bytes),
            record_count: records.len(),
            size_bytes: bytes.len() as u64,
        };

        self.catalog.insert_pending(artifact.clone())?;
        if let Err(e) = self.catalog.flush() {
            error!(artifact_id = %artifact.id, phase = "catalog", error = %e, "cannot record pending artifact");
            let _ = self.catalog.remove(&artifact.id);
            return Err(e);
        }

        let path = self.artifact_path(&artifact);
        let outcome = self
            .store(&path, &bytes)
            .map_err(|e| {
                error!(artifact_id = %artifact.id, phase = "write", error = %e, "artifact write failed");
                ArchiveError::write_failure(artifact.id.as_str(), e.to_string())
            })
            .and_then(|_| {
                inspect_artifact_file(&path, &artifact).map_err(|reason| {
                    error!(artifact_id = %artifact.id, phase = "verify", %reason, "round-trip verification failed");
                    ArchiveError::verification_failure(artifact.id.as_str(), reason)
                })
            })
            .and_then(|_| {
                self.catalog.mark_verified(&artifact.id, Utc::now())?;
                self.catalog.flush()
            });

        match outcome {
            Ok(()) => {
                info!(
                    artifact_id = %artifact.id,
                    phase = "catalog",
                    kind = %artifact.kind,
                    records = artifact.record_count,
                    bytes = artifact.size_bytes,
                    "backup created"
                );
                Ok(artifact)
            }
            Err(e) => {
                self.discard(&artifact, &path);
                Err(e)
            }
        }
    }

    #[cfg(not(test))]
    fn store(&self, path: &Path, bytes: &[u8]) -> ArchiveResult<()> {
        write_bytes_synced(path, bytes)
    }

    #[cfg(test)]
    fn store(&self, path: &Path, bytes: &[u8]) -> ArchiveResult<()> {
        match self.fault {
            None => write_bytes_synced(path, bytes),
            Some(InjectedFault::Write) => {
                fs::write(path, &bytes[..bytes.len() / 2])
                    .map_err(|e| ArchiveError::Io(e.to_string()))?;
                Err(ArchiveError::Io(format!(
                    "Failed to write {}: no space left on device",
                    path.display()
                )))
            }
            Some(InjectedFault::Corruption) => {
                let mut damaged = bytes.to_vec();
                let mid = damaged.len() / 2;
                damaged[mid] ^= 0x01;
                write_bytes_synced(path, &damaged)
            }
        }
    }

    /// Undo a failed creation: file first, then the catalog entry
    fn discard(&mut self, artifact: &Artifact, path: &Path) {
        if let Err(e) = remove_if_exists(path) {
            error!(artifact_id = %artifact.id, phase = "cleanup", error = %e, "cannot remove partial artifact");
        }

        if self.catalog.mark_failed(&artifact.id).is_ok() {
            if let Err(e) = self.catalog.flush() {
                warn!(artifact_id = %artifact.id, phase = "cleanup", error = %e, "cannot record failed artifact");
            }
        }
        let _ = self.catalog.remove(&artifact.id);
        if let Err(e) = self.catalog.flush() {
            error!(artifact_id = %artifact.id, phase = "cleanup", error = %e, "cannot drop failed artifact from catalog");
        }
    }

    /// Re-read a stored artifact and check it against its catalog entry
    ///
    /// A previously verified artifact that fails is flagged `Corrupt` but
    /// left on disk.
    pub fn verify(&mut self, id: &ArtifactId) -> ArchiveResult<VerifyOutcome> {
        let (status, result) = {
            let _lock = DirLock::shared(&self.backup_dir)?;
            self.catalog.reload()?;
            let entry = self
                .catalog
                .get(id)
                .ok_or_else(|| ArchiveError::artifact_not_found(id.as_str()))?;
            let result = inspect_artifact_file(&self.artifact_path(&entry.artifact), &entry.artifact);
            (entry.status, result)
        };

        match result {
            Ok(()) => {
                info!(artifact_id = %id, phase = "verify", "artifact verified");
                Ok(VerifyOutcome::Verified)
            }
            Err(reason) => {
                warn!(artifact_id = %id, phase = "verify", %reason, "artifact is corrupt");
                if status == EntryStatus::Verified {
                    self.flag_corrupt(id);
                }
                Ok(VerifyOutcome::Corrupt { reason })
            }
        }
    }

    fn flag_corrupt(&mut self, id: &ArtifactId) {
        let persisted = DirLock::exclusive(&self.backup_dir).and_then(|_lock| {
            self.catalog.reload()?;
            if self.catalog.get(id).map(|e| e.status) == Some(EntryStatus::Verified) {
                self.catalog.mark_corrupt(id)?;
                self.catalog.flush()?;
            }
            Ok(())
        });
        if let Err(e) = persisted {
            warn!(artifact_id = %id, phase = "verify", error = %e, "corrupt flag not persisted");
        }
    }

    /// Delete expired chains per `config`
    ///
    /// Deletion is best-effort per artifact; failures are collected in the
    /// report, never raised.
    pub fn apply_retention(&mut self, config: &RetentionConfig) -> ArchiveResult<RetentionReport> {
        config.validate()?;
        let _lock = DirLock::exclusive(&self.backup_dir)?;
        self.catalog.reload()?;
        self.prune(config)
    }

    fn prune(&mut self, config: &RetentionConfig) -> ArchiveResult<RetentionReport> {
        let plan = retention::plan(self.catalog.entries(), config, Utc::now());
        let mut report = RetentionReport::default();

        for id in &plan.orphans {
            self.delete_artifact(id, &mut report);
        }

        for chain in &plan.expired {
            // Members are dependents first; once one sticks, keep its ancestors
            let mut blocked_by: Option<ArtifactId> = None;
            for id in &chain.members {
                if let Some(blocker) = &blocked_by {
                    report.failed.push(DeleteFailure {
                        artifact: id.clone(),
                        reason: format!("kept because dependent {} could not be deleted", blocker),
                    });
                    continue;
                }
                if !self.delete_artifact(id, &mut report) {
                    blocked_by = Some(id.clone());
                }
            }
        }

        if !report.deleted.is_empty() {
            self.catalog.flush()?;
        }

        info!(
            phase = "retention",
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            kept_chains = plan.kept.len(),
            "retention applied"
        );
        Ok(report)
    }

    fn delete_artifact(&mut self, id: &ArtifactId, report: &mut RetentionReport) -> bool {
        let Some(entry) = self.catalog.get(id) else {
            return true;
        };
        let path = self.artifact_path(&entry.artifact);

        match remove_if_exists(&path) {
            Ok(_) => {
                let _ = self.catalog.remove(id);
                info!(artifact_id = %id, phase = "retention", "deleted artifact");
                report.deleted.push(id.clone());
                true
            }
            Err(e) => {
                warn!(artifact_id = %id, phase = "retention", error = %e, "cannot delete artifact");
                report.failed.push(DeleteFailure {
                    artifact: id.clone(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Backup history, oldest first
    pub fn list_artifacts(&mut self) -> ArchiveResult<Vec<CatalogEntry>> {
        let _lock = DirLock::shared(&self.backup_dir)?;
        self.catalog.reload()?;
        Ok(self.catalog.snapshot())
    }

    /// Newest committed artifact
    pub fn latest(&mut self) -> ArchiveResult<Option<CatalogEntry>> {
        Ok(self
            .list_artifacts()?
            .into_iter()
            .rev()
            .find(|e| e.status.is_committed()))
    }

    pub fn stats(&mut self) -> ArchiveResult<BackupStats> {
        let entries = self.list_artifacts()?;
        let committed: Vec<&CatalogEntry> =
            entries.iter().filter(|e| e.status.is_committed()).collect();

        let stamp = |e: &&CatalogEntry| (e.id().clone(), e.artifact.created_at);
        Ok(BackupStats {
            total_artifacts: committed.len(),
            full_count: committed.iter().filter(|e| e.artifact.is_full()).count(),
            incremental_count: committed.iter().filter(|e| !e.artifact.is_full()).count(),
            verified_count: committed
                .iter()
                .filter(|e| e.status == EntryStatus::Verified)
                .count(),
            corrupt_count: committed
                .iter()
                .filter(|e| e.status == EntryStatus::Corrupt)
                .count(),
            total_bytes: committed.iter().map(|e| e.artifact.size_bytes).sum(),
            oldest: committed.first().map(stamp),
            newest: committed.last().map(stamp),
            latest_full_records: committed
                .iter()
                .rev()
                .find(|e| e.artifact.is_full())
                .map(|e| e.artifact.record_count),
        })
    }

    /// Rebuild the record set as of artifact `id`
    pub fn restore(&mut self, id: &ArtifactId) -> ArchiveResult<RestoreResult> {
        let _lock = DirLock::shared(&self.backup_dir)?;
        self.catalog.reload()?;
        restore::restore_records(&self.catalog, &self.backup_dir, id)
    }

    /// Restore artifact `id` into a JSON file at `out`
    pub fn restore_to_file(&mut self, id: &ArtifactId, out: &Path) -> ArchiveResult<RestoreResult> {
        let _lock = DirLock::shared(&self.backup_dir)?;
        self.catalog.reload()?;
        restore::restore_to_file(&self.catalog, &self.backup_dir, id, out)
    }
}

/// Check a stored file against its artifact metadata
///
/// Returns the reason on mismatch: unreadable file, size, checksum, decode
/// or record count.
pub(crate) fn inspect_artifact_file(path: &Path, artifact: &Artifact) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;

    if bytes.len() as u64 != artifact.size_bytes {
        return Err(format!(
            "size mismatch: expected {} bytes, found {}",
            artifact.size_bytes,
            bytes.len()
        ));
    }
    let actual = codec::checksum(&bytes);
    if actual != artifact.checksum {
        return Err(format!(
            "checksum mismatch: expected {}, found {}",
            artifact.checksum, actual
        ));
    }
    let (_, count) = codec::decode(&bytes).map_err(|e| e.to_string())?;
    if count != artifact.record_count {
        return Err(format!(
            "record count mismatch: expected {}, decoded {}",
            artifact.record_count, count
        ));
    }
    Ok(())
}
