use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tempfile::TempDir;

use archiver::backup::catalog::BackupCatalog;
use archiver::backup::codec;
use archiver::backup::{BackupEngine, EngineOptions, RetentionConfig, VerifyOutcome};
use archiver::error::{ArchiveError, ArchiveResult};
use archiver::models::{Artifact, ArtifactId, ArtifactKind, EntryStatus, Record};
use archiver::source::{MemorySource, SourceStore};

fn conversation(id: &str, title: &str) -> Record {
    Record::new(
        id,
        Utc::now(),
        json!({
            "active_task_id": format!("task-{}", id),
            "conversation_data": {"todo_lists": [{"completed_items": [{"title": title}]}]},
        }),
    )
}

/// Keep edits clear of the previous artifact's creation time
fn tick() {
    thread::sleep(std::time::Duration::from_millis(2));
}

fn open(source: &MemorySource, dir: &Path) -> BackupEngine<MemorySource> {
    BackupEngine::open(source.clone(), EngineOptions::new(dir)).unwrap()
}

fn artifact_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with("full-") || n.starts_with("incremental-"))
        .collect();
    names.sort();
    names
}

#[test]
fn restore_of_latest_chain_matches_source() {
    let temp_dir = TempDir::new().unwrap();
    let source = MemorySource::with_records([
        conversation("a", "first"),
        conversation("b", "second"),
    ]);
    let mut engine = open(&source, temp_dir.path());

    engine.create_full().unwrap();
    for round in 0..4 {
        tick();
        source.upsert(conversation("a", &format!("edit {}", round)));
        source.upsert(conversation(&format!("new-{}", round), "fresh"));
        let inc = engine.create_incremental().unwrap();
        assert_eq!(inc.kind, ArtifactKind::Incremental);
        assert_eq!(inc.record_count, 2);
    }

    let latest = engine.latest().unwrap().unwrap();
    let restored = engine.restore(latest.id()).unwrap();
    assert_eq!(restored.artifact_ids.len(), 5);
    assert_eq!(restored.into_records(), source.all_records().unwrap());
}

#[test]
fn incremental_falls_back_to_full_on_empty_catalog() {
    let temp_dir = TempDir::new().unwrap();
    let source = MemorySource::with_records([conversation("a", "x")]);
    let mut engine = open(&source, temp_dir.path());

    let artifact = engine.create_incremental().unwrap();
    assert_eq!(artifact.kind, ArtifactKind::Full);
    assert_eq!(artifact.baseline, None);
    assert_eq!(artifact.record_count, 1);
}

#[test]
fn unchanged_source_gives_empty_incremental() {
    let temp_dir = TempDir::new().unwrap();
    let source = MemorySource::with_records([conversation("a", "x")]);
    let mut engine = open(&source, temp_dir.path());

    engine.create_full().unwrap();
    let inc = engine.create_incremental().unwrap();
    assert_eq!(inc.kind, ArtifactKind::Incremental);
    assert_eq!(inc.record_count, 0);
    assert_eq!(
        engine.catalog().get(&inc.id).unwrap().status,
        EntryStatus::Verified
    );
}

#[test]
fn byte_flip_is_reported_and_flagged_not_deleted() {
    let temp_dir = TempDir::new().unwrap();
    let source = MemorySource::with_records([conversation("a", "x"), conversation("b", "y")]);
    let mut engine = open(&source, temp_dir.path());
    let full = engine.create_full().unwrap();
    let inc = engine.create_incremental().unwrap();

    let path = temp_dir.path().join(&full.file_name);
    let mut bytes = fs::read(&path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x20;
    fs::write(&path, &bytes).unwrap();

    match engine.verify(&full.id).unwrap() {
        VerifyOutcome::Corrupt { reason } => assert!(reason.contains("checksum")),
        VerifyOutcome::Verified => panic!("flipped byte went unnoticed"),
    }
    assert!(path.exists());

    // A fresh reader sees the flag on disk
    let catalog = BackupCatalog::load(temp_dir.path()).unwrap();
    assert_eq!(catalog.get(&full.id).unwrap().status, EntryStatus::Corrupt);

    // Neither the corrupt full nor its dependent can be a baseline
    assert!(!catalog.is_healthy(&inc.id));
    let next = engine.create_incremental().unwrap();
    assert_eq!(next.kind, ArtifactKind::Full);

    // Restoring through the corrupt link fails
    assert!(matches!(
        engine.restore(&inc.id),
        Err(ArchiveError::VerificationFailure { .. })
    ));
}

#[test]
fn reopening_sweeps_interrupted_work() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let source = MemorySource::with_records([conversation("a", "x")]);
    let good = open(&source, dir).create_full().unwrap();

    // A pending entry whose write never finished
    let pending_at = good.created_at + Duration::seconds(1);
    let pending_id = ArtifactId::new(ArtifactKind::Incremental, pending_at);
    let bytes = codec::encode(&[], true).unwrap();
    let pending = Artifact {
        file_name: Artifact::file_name_for(&pending_id, true),
        id: pending_id.clone(),
        kind: ArtifactKind::Incremental,
        created_at: pending_at,
        captured_at: None,
        baseline: Some(good.id.clone()),
        compressed: true,
        checksum: codec::checksum(&bytes),
        record_count: 0,
        size_bytes: bytes.len() as u64,
    };
    fs::write(dir.join(&pending.file_name), &bytes[..3]).unwrap();
    let mut catalog = BackupCatalog::load(dir).unwrap();
    catalog.insert_pending(pending).unwrap();
    catalog.flush().unwrap();

    // An artifact file the catalog never heard of, and a stale temp file
    let stray = ArtifactId::new(ArtifactKind::Full, good.created_at + Duration::seconds(2));
    fs::write(dir.join(format!("{}.json", stray)), b"{}").unwrap();
    fs::write(dir.join("catalog.json.tmp"), b"{").unwrap();

    let engine = open(&source, dir);
    let report = engine.recovery_report();
    assert_eq!(report.discarded_entries, vec![pending_id]);
    assert_eq!(report.removed_files.len(), 2);
    assert!(report.missing_files.is_empty());

    assert_eq!(artifact_files(dir), vec![good.file_name.clone()]);
    assert!(!dir.join("catalog.json.tmp").exists());
    assert_eq!(engine.catalog().len(), 1);

    // A second sweep has nothing left to do
    assert!(open(&source, dir).recovery_report().is_clean());
}

#[test]
fn missing_artifact_file_is_reported_by_recovery() {
    let temp_dir = TempDir::new().unwrap();
    let source = MemorySource::with_records([conversation("a", "x")]);
    let artifact = open(&source, temp_dir.path()).create_full().unwrap();
    fs::remove_file(temp_dir.path().join(&artifact.file_name)).unwrap();

    let mut engine = open(&source, temp_dir.path());
    assert_eq!(engine.recovery_report().missing_files, vec![artifact.id.clone()]);
    assert_eq!(
        engine.catalog().get(&artifact.id).unwrap().status,
        EntryStatus::Corrupt
    );
    assert_eq!(
        BackupCatalog::load(temp_dir.path()).unwrap().get(&artifact.id).unwrap().status,
        EntryStatus::Corrupt
    );

    // Nothing to build on, so the next incremental is a full
    let next = engine.create_incremental().unwrap();
    assert_eq!(next.kind, ArtifactKind::Full);
    assert!(next.baseline.is_none());
}

#[cfg(unix)]
#[test]
fn undeletable_unfinished_artifact_is_reported_and_kept() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let source = MemorySource::with_records([conversation("a", "x")]);
    let good = open(&source, dir).create_full().unwrap();

    let pending_at = good.created_at + Duration::seconds(1);
    let pending_id = ArtifactId::new(ArtifactKind::Full, pending_at);
    let pending = Artifact {
        file_name: Artifact::file_name_for(&pending_id, true),
        id: pending_id.clone(),
        kind: ArtifactKind::Full,
        created_at: pending_at,
        captured_at: None,
        baseline: None,
        compressed: true,
        checksum: String::new(),
        record_count: 0,
        size_bytes: 0,
    };
    // A non-empty directory where the file should be cannot be unlinked
    let blocked = dir.join(&pending.file_name);
    fs::create_dir(&blocked).unwrap();
    fs::write(blocked.join("keep"), "x").unwrap();
    let mut catalog = BackupCatalog::load(dir).unwrap();
    catalog.insert_pending(pending).unwrap();
    catalog.flush().unwrap();

    let engine = open(&source, dir);
    let report = engine.recovery_report();
    assert_eq!(report.stuck_entries, vec![pending_id.clone()]);
    assert!(report.discarded_entries.is_empty());
    assert!(!report.is_clean());
    assert_eq!(
        engine.catalog().get(&pending_id).unwrap().status,
        EntryStatus::Pending
    );
    assert!(blocked.exists());
}

/// Source that parks inside `all_records` until released
struct ParkedSource {
    entered: Sender<()>,
    release: Mutex<Receiver<()>>,
    inner: MemorySource,
}

impl SourceStore for ParkedSource {
    fn all_records(&self) -> ArchiveResult<Vec<Record>> {
        let _ = self.entered.send(());
        let _ = self.release.lock().unwrap().recv();
        self.inner.all_records()
    }

    fn records_since(&self, since: DateTime<Utc>) -> ArchiveResult<Vec<Record>> {
        self.inner.records_since(since)
    }

    fn snapshot_to(&self, dest: &Path) -> ArchiveResult<()> {
        self.inner.snapshot_to(dest)
    }
}

#[test]
fn concurrent_backup_fails_fast_without_partial_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_path_buf();
    let memory = MemorySource::with_records([conversation("a", "x")]);

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let parked = ParkedSource {
        entered: entered_tx,
        release: Mutex::new(release_rx),
        inner: memory.clone(),
    };

    let mut first = BackupEngine::open(parked, EngineOptions::new(&dir)).unwrap();
    let mut second = open(&memory, &dir);

    let worker = thread::spawn(move || first.create_full());
    entered_rx.recv().unwrap();

    let err = second.create_full().unwrap_err();
    assert!(err.is_in_progress());
    assert_eq!(err.exit_code(), 14);
    assert!(artifact_files(&dir).is_empty());
    assert!(second.list_artifacts().unwrap_err().is_in_progress());

    release_tx.send(()).unwrap();
    let artifact = worker.join().unwrap().unwrap();

    let entries = second.list_artifacts().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id(), &artifact.id);
    assert_eq!(artifact_files(&dir), vec![artifact.file_name]);
}

#[test]
fn retention_keeps_two_newest_chains_of_five() {
    let temp_dir = TempDir::new().unwrap();
    let source = MemorySource::with_records([conversation("a", "x")]);
    let mut engine = open(&source, temp_dir.path());

    let mut fulls = Vec::new();
    for _ in 0..5 {
        fulls.push(engine.create_full().unwrap());
        tick();
        source.upsert(conversation("a", "changed"));
        engine.create_incremental().unwrap();
    }

    let config = RetentionConfig {
        max_age: None,
        max_count: Some(2),
    };
    let report = engine.apply_retention(&config).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.deleted.len(), 6);

    let remaining = engine.list_artifacts().unwrap();
    assert_eq!(remaining.len(), 4);
    assert_eq!(remaining[0].id(), &fulls[3].id);
    assert_eq!(remaining[2].id(), &fulls[4].id);
    for entry in &remaining {
        let ancestry = engine.catalog().ancestry(entry.id()).unwrap();
        assert!(ancestry[0].artifact.is_full());
    }
    assert_eq!(artifact_files(temp_dir.path()).len(), 4);
}

#[test]
fn zero_max_count_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let source = MemorySource::new();
    let mut engine = open(&source, temp_dir.path());
    engine.create_full().unwrap();

    let config = RetentionConfig {
        max_age: None,
        max_count: Some(0),
    };
    assert!(matches!(
        engine.apply_retention(&config),
        Err(ArchiveError::Config(_))
    ));
    assert_eq!(engine.list_artifacts().unwrap().len(), 1);
}

#[test]
fn unavailable_source_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let source = MemorySource::with_records([conversation("a", "x")]);
    let mut engine = open(&source, temp_dir.path());
    source.set_unavailable(Some("database is locked"));

    let err = engine.create_full().unwrap_err();
    assert_eq!(err.exit_code(), 10);
    assert!(artifact_files(temp_dir.path()).is_empty());
    assert!(BackupCatalog::load(temp_dir.path()).unwrap().is_empty());
}

#[test]
fn unwritable_directory_is_write_failure() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("backups");
    let source = MemorySource::with_records([conversation("a", "x")]);
    let mut engine = open(&source, &dir);

    // The backup directory is no longer a directory
    fs::remove_dir_all(&dir).unwrap();
    fs::write(&dir, b"not a directory").unwrap();

    let err = engine.create_full().unwrap_err();
    assert!(matches!(err, ArchiveError::WriteFailure { .. }));
    assert_eq!(err.exit_code(), 11);
}

#[test]
fn uncompressed_artifacts_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let source = MemorySource::with_records([conversation("a", "x")]);
    let mut engine = BackupEngine::open(
        source.clone(),
        EngineOptions::new(temp_dir.path()).compress(false),
    )
    .unwrap();

    let artifact = engine.create_full().unwrap();
    let bytes = fs::read(temp_dir.path().join(&artifact.file_name)).unwrap();
    assert!(!codec::is_compressed(&bytes));
    assert_eq!(bytes[0], b'{');
    assert!(engine.verify(&artifact.id).unwrap().is_verified());
    assert_eq!(
        engine.restore(&artifact.id).unwrap().into_records(),
        source.all_records().unwrap()
    );
}
