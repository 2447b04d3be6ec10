//! SQLite-backed source store
//!
//! Reads the terminal's `agent_conversations` table. The database is opened
//! read-only on every call, so a locked or missing file surfaces as
//! `SourceUnavailable` at the moment of the backup rather than at startup.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Value};
use tracing::debug;

use super::SourceStore;
use crate::error::{ArchiveError, ArchiveResult};
use crate::models::Record;

const SELECT_CONVERSATIONS: &str = "
    SELECT id, conversation_id, active_task_id, conversation_data, last_modified_at
    FROM agent_conversations
    ORDER BY last_modified_at, conversation_id";

const SELECT_STATS: &str = "
    SELECT COUNT(*), MIN(last_modified_at), MAX(last_modified_at),
           COALESCE(SUM(LENGTH(conversation_data)), 0)
    FROM agent_conversations";

/// Overview of the conversation database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub total_conversations: u64,
    /// Size of the database file on disk
    pub database_size: u64,
    pub oldest_conversation: Option<DateTime<Utc>>,
    pub newest_conversation: Option<DateTime<Utc>>,
    /// Sum of the raw `conversation_data` lengths
    pub total_data_size: u64,
}

/// Source store over a SQLite conversation database
#[derive(Debug, Clone)]
pub struct SqliteSource {
    db_path: PathBuf,
}

impl SqliteSource {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> ArchiveResult<Connection> {
        if !self.db_path.exists() {
            return Err(ArchiveError::SourceUnavailable(format!(
                "Conversation database not found at {}",
                self.db_path.display()
            )));
        }

        Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| unavailable(&self.db_path, e))
    }

    /// Row counts, time range and sizes of the conversation table
    pub fn stats(&self) -> ArchiveResult<SourceStats> {
        let conn = self.open()?;
        let database_size = std::fs::metadata(&self.db_path)
            .map_err(|e| ArchiveError::SourceUnavailable(format!("{}: {}", self.db_path.display(), e)))?
            .len();

        let (count, oldest, newest, data_size) = conn
            .query_row(SELECT_STATS, [], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|e| unavailable(&self.db_path, e))?;

        Ok(SourceStats {
            total_conversations: count.max(0) as u64,
            database_size,
            oldest_conversation: oldest.as_deref().and_then(parse_timestamp),
            newest_conversation: newest.as_deref().and_then(parse_timestamp),
            total_data_size: data_size.max(0) as u64,
        })
    }

    fn load(&self) -> ArchiveResult<Vec<Record>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(SELECT_CONVERSATIONS)
            .map_err(|e| unavailable(&self.db_path, e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| unavailable(&self.db_path, e))?;

        let mut records = Vec::new();
        for row in rows {
            let (row_id, conversation_id, active_task_id, raw_data, modified) =
                row.map_err(|e| unavailable(&self.db_path, e))?;

            let last_modified = parse_timestamp(&modified).ok_or_else(|| {
                ArchiveError::SourceUnavailable(format!(
                    "Unparseable last_modified_at '{}' for conversation {}",
                    modified, conversation_id
                ))
            })?;

            // Keep undecodable payloads verbatim rather than dropping them
            let parsed = serde_json::from_str::<Value>(&raw_data).ok();
            let summary = summarize(parsed.as_ref());
            let message_count = parsed.as_ref().map_or(0, count_items);
            let data = parsed.unwrap_or_else(|| Value::String(raw_data.clone()));

            records.push(Record {
                id: conversation_id,
                last_modified,
                payload: json!({
                    "row_id": row_id,
                    "active_task_id": active_task_id,
                    "conversation_data": data,
                    "message_count": message_count,
                    "summary": summary,
                }),
                size_bytes: raw_data.len() as u64,
            });
        }

        debug!(count = records.len(), db = %self.db_path.display(), "read conversations");
        Ok(records)
    }
}

impl SourceStore for SqliteSource {
    fn all_records(&self) -> ArchiveResult<Vec<Record>> {
        self.load()
    }

    fn records_since(&self, since: DateTime<Utc>) -> ArchiveResult<Vec<Record>> {
        // Timestamps are text columns in mixed formats, so filter after parsing
        Ok(self
            .load()?
            .into_iter()
            .filter(|r| r.modified_after(since))
            .collect())
    }

    fn snapshot_to(&self, dest: &Path) -> ArchiveResult<()> {
        if dest.exists() {
            return Err(ArchiveError::write_failure(
                dest.display().to_string(),
                "destination already exists",
            ));
        }
        let conn = self.open()?;
        conn.execute("VACUUM INTO ?1", [dest.to_string_lossy().as_ref()])
            .map_err(|e| ArchiveError::write_failure(dest.display().to_string(), e.to_string()))?;
        Ok(())
    }
}

/// Per todo list: (completed, pending) item counts
fn todo_counts(data: &Value) -> Vec<(usize, usize)> {
    let len = |list: &Value, key: &str| list.get(key).and_then(Value::as_array).map_or(0, Vec::len);
    data.get("todo_lists")
        .and_then(Value::as_array)
        .map(|lists| {
            lists
                .iter()
                .map(|list| (len(list, "completed_items"), len(list, "pending_items")))
                .collect()
        })
        .unwrap_or_default()
}

/// Completed plus pending items across every todo list
fn count_items(data: &Value) -> usize {
    todo_counts(data).iter().map(|(done, open)| done + open).sum()
}

/// One-line description, e.g. `3 items, 2 completed, 1 pending`
fn summarize(data: Option<&Value>) -> String {
    let Some(data) = data else {
        return "No data available".to_string();
    };

    let mut parts = Vec::new();
    let total = count_items(data);
    if total > 0 {
        parts.push(format!("{} items", total));
    }
    for (done, open) in todo_counts(data) {
        if done > 0 {
            parts.push(format!("{} completed", done));
        }
        if open > 0 {
            parts.push(format!("{} pending", open));
        }
    }

    if parts.is_empty() {
        "Empty conversation".to_string()
    } else {
        parts.join(", ")
    }
}

fn unavailable(path: &Path, err: rusqlite::Error) -> ArchiveError {
    ArchiveError::SourceUnavailable(format!("{}: {}", path.display(), err))
}

/// Parse RFC 3339 or SQLite's `YYYY-MM-DD HH:MM:SS[.f]` (taken as UTC)
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}
