use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

fn create_source_db(dir: &Path) -> PathBuf {
    let path = dir.join("warp.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE agent_conversations (
            id INTEGER PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            active_task_id TEXT,
            conversation_data TEXT NOT NULL,
            last_modified_at TEXT NOT NULL
        );
        INSERT INTO agent_conversations
            (conversation_id, active_task_id, conversation_data, last_modified_at)
        VALUES
            ('conv-alpha', 'task-1', '{\"todo_lists\": [{\"completed_items\": [{\"title\": \"ship it\"}]}]}', '2024-01-01 10:00:00'),
            ('conv-beta', NULL, '{\"todo_lists\": []}', '2024-01-02 11:30:00.5');",
    )
    .unwrap();
    path
}

/// Data dir with settings pointing at `db`
fn setup(db: &Path) -> TempDir {
    let data_dir = TempDir::new().unwrap();
    let settings = json!({
        "source_db_path": db,
        "backup": {"compress": true, "auto_prune": true},
    });
    fs::write(
        data_dir.path().join("config.json"),
        serde_json::to_string_pretty(&settings).unwrap(),
    )
    .unwrap();
    data_dir
}

fn archive(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("chat-archive").unwrap();
    cmd.env("CHAT_ARCHIVER_DATA_DIR", data_dir.path())
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn init_writes_default_settings() {
    let data_dir = TempDir::new().unwrap();
    archive(&data_dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialization complete!"));

    let written = fs::read_to_string(data_dir.path().join("config.json")).unwrap();
    assert!(written.contains("\"max_count\": 10"));
}

#[test]
fn full_backup_list_verify_restore() {
    let source_dir = TempDir::new().unwrap();
    let db = create_source_db(source_dir.path());
    let data_dir = setup(&db);

    archive(&data_dir)
        .args(["backup", "full"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup created: full-"))
        .stdout(predicate::str::contains("Records: 2"));

    archive(&data_dir)
        .args(["backup", "incremental"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup created: incremental-"))
        .stdout(predicate::str::contains("Records: 0"));

    archive(&data_dir)
        .args(["backup", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("incremental"))
        .stdout(predicate::str::contains("verified"))
        .stdout(predicate::str::contains("Total: 2 backup(s)"));

    archive(&data_dir)
        .args(["backup", "verify", "latest"])
        .assert()
        .success()
        .stdout(predicate::str::contains(": OK"));

    archive(&data_dir)
        .args(["backup", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 (1 full, 1 incremental)"))
        .stdout(predicate::str::contains("Conversations: 2"));

    let out = source_dir.path().join("restored.json");
    archive(&data_dir)
        .args(["backup", "restore", "latest"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored 2 record(s) from 2 artifact(s)"));

    let restored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(restored[0]["id"], "conv-alpha");
    assert_eq!(restored[0]["payload"]["active_task_id"], "task-1");
    assert_eq!(restored[0]["payload"]["summary"], "1 items, 1 completed");
    assert_eq!(restored[1]["id"], "conv-beta");
}

#[test]
fn missing_source_exits_with_source_unavailable() {
    let source_dir = TempDir::new().unwrap();
    let data_dir = setup(&source_dir.path().join("nope.sqlite"));

    archive(&data_dir)
        .args(["backup", "full"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn verify_unknown_artifact_exits_not_found() {
    let source_dir = TempDir::new().unwrap();
    let data_dir = setup(&create_source_db(source_dir.path()));

    archive(&data_dir)
        .args(["backup", "verify", "full-20260101T000000.000000000Z"])
        .assert()
        .code(16);
}

#[test]
fn corrupted_artifact_fails_verification() {
    let source_dir = TempDir::new().unwrap();
    let data_dir = setup(&create_source_db(source_dir.path()));
    archive(&data_dir).args(["backup", "full"]).assert().success();

    let backups = data_dir.path().join("backups");
    let artifact = fs::read_dir(&backups)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.to_string_lossy().ends_with(".json.gz"))
        .unwrap();
    let mut bytes = fs::read(&artifact).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x01;
    fs::write(&artifact, bytes).unwrap();

    archive(&data_dir)
        .args(["backup", "verify", "latest"])
        .assert()
        .code(12)
        .stdout(predicate::str::contains("CORRUPT"));

    archive(&data_dir)
        .args(["backup", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("corrupt"));
}

#[test]
fn prune_without_force_is_a_dry_run() {
    let source_dir = TempDir::new().unwrap();
    let db = create_source_db(source_dir.path());
    let data_dir = TempDir::new().unwrap();
    let settings = json!({
        "source_db_path": db,
        "backup": {"auto_prune": false, "retention": {"max_count": 1, "max_age_days": null}},
    });
    fs::write(data_dir.path().join("config.json"), settings.to_string()).unwrap();

    for _ in 0..3 {
        archive(&data_dir).args(["backup", "full"]).assert().success();
    }

    archive(&data_dir)
        .args(["backup", "prune"])
        .assert()
        .success()
        .stdout(predicate::str::contains("To be deleted: 2 artifact(s)"))
        .stdout(predicate::str::contains("--force"));

    archive(&data_dir)
        .args(["backup", "list"])
        .assert()
        .stdout(predicate::str::contains("Total: 3 backup(s)"));

    archive(&data_dir)
        .args(["backup", "prune", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted 2 old backup(s)."));

    archive(&data_dir)
        .args(["backup", "list"])
        .assert()
        .stdout(predicate::str::contains("Total: 1 backup(s)"));
}

#[test]
fn zero_max_count_is_a_config_error() {
    let source_dir = TempDir::new().unwrap();
    let db = create_source_db(source_dir.path());
    let data_dir = TempDir::new().unwrap();
    let settings = json!({
        "source_db_path": db,
        "backup": {"retention": {"max_count": 0}},
    });
    fs::write(data_dir.path().join("config.json"), settings.to_string()).unwrap();

    archive(&data_dir).args(["backup", "full"]).assert().code(2);
}

#[test]
fn snapshot_copies_the_database() {
    let source_dir = TempDir::new().unwrap();
    let data_dir = setup(&create_source_db(source_dir.path()));
    let dest = source_dir.path().join("copy.sqlite");

    archive(&data_dir)
        .arg("snapshot")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Snapshot written"));

    let conn = Connection::open(&dest).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM agent_conversations", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 2);
}
