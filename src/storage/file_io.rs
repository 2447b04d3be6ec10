//! File I/O utilities with atomic writes
//!
//! Provides safe file operations that won't corrupt data on failure. The
//! catalog and restore outputs go through [`write_json_atomic`]; artifact
//! payloads go through [`write_bytes_synced`], which never leaves a partial
//! file behind.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::ArchiveError;

/// Suffix used for in-flight temporary files
pub const TEMP_SUFFIX: &str = "tmp";

/// Read JSON from a file, returning a default value if file doesn't exist
pub fn read_json<T, P>(path: P) -> Result<T, ArchiveError>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if !path.exists() {
        return Ok(T::default());
    }

    let file = File::open(path)
        .map_err(|e| ArchiveError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| ArchiveError::Json(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Temp path next to `path` (same directory, so the rename stays atomic)
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Write JSON to a file atomically (write to temp, then rename)
///
/// This ensures that the file is either completely written or not modified at all,
/// preventing corruption on crashes or power failures.
pub fn write_json_atomic<T, P>(path: P, data: &T) -> Result<(), ArchiveError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ArchiveError::Io(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = temp_path_for(path);

    let result = (|| {
        let file = File::create(&temp_path)
            .map_err(|e| ArchiveError::Io(format!("Failed to create temp file: {}", e)))?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, data)
            .map_err(|e| ArchiveError::Json(format!("Failed to serialize data: {}", e)))?;

        writer
            .flush()
            .map_err(|e| ArchiveError::Io(format!("Failed to flush data: {}", e)))?;

        // Sync to disk before rename
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| ArchiveError::Io(format!("Failed to sync data: {}", e)))?;

        fs::rename(&temp_path, path)
            .map_err(|e| ArchiveError::Io(format!("Failed to rename temp file: {}", e)))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Write raw bytes to `path` and sync them to disk
///
/// On any failure the partially written file is removed before the error is
/// returned, so callers never observe a truncated artifact.
pub fn write_bytes_synced(path: &Path, bytes: &[u8]) -> Result<(), ArchiveError> {
    let result = (|| {
        let mut file = File::create(path)
            .map_err(|e| ArchiveError::Io(format!("Failed to create {}: {}", path.display(), e)))?;
        file.write_all(bytes)
            .map_err(|e| ArchiveError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
        file.sync_all()
            .map_err(|e| ArchiveError::Io(format!("Failed to sync {}: {}", path.display(), e)))?;

        let written = file
            .metadata()
            .map_err(|e| ArchiveError::Io(format!("Failed to stat {}: {}", path.display(), e)))?
            .len();
        if written != bytes.len() as u64 {
            return Err(ArchiveError::Io(format!(
                "Short write to {}: {} of {} bytes",
                path.display(),
                written,
                bytes.len()
            )));
        }
        Ok(())
    })();

    if result.is_err() && path.exists() {
        let _ = fs::remove_file(path);
    }
    result
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
