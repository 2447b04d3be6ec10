//! Advisory lock over a backup directory
//!
//! Mutating operations hold the exclusive lock; read-only operations hold a
//! shared one. Acquisition never blocks: contention is reported as
//! `BackupInProgress` and the caller decides whether to retry.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult};

/// Lock file name inside the backup directory
pub const LOCK_FILE: &str = ".lock";

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl DirLock {
    /// Try to take the exclusive lock on `dir`
    pub fn exclusive(dir: &Path) -> ArchiveResult<Self> {
        Self::try_acquire(dir, LockMode::Exclusive)
    }

    /// Try to take a shared lock on `dir`
    pub fn shared(dir: &Path) -> ArchiveResult<Self> {
        Self::try_acquire(dir, LockMode::Shared)
    }

    fn try_acquire(dir: &Path, mode: LockMode) -> ArchiveResult<Self> {
        let path = dir.join(LOCK_FILE);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                ArchiveError::write_failure(
                    path.display().to_string(),
                    format!("cannot open lock file: {}", e),
                )
            })?;

        let acquired = match mode {
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            LockMode::Shared => FileExt::try_lock_shared(&file),
        };
        if acquired.is_err() {
            return Err(ArchiveError::BackupInProgress(path));
        }

        // Owner details help a human inspecting a stuck directory
        if mode == LockMode::Exclusive {
            let owner = format!(
                "pid={}\nacquired_at={}\n",
                std::process::id(),
                Utc::now().to_rfc3339()
            );
            let _ = file
                .set_len(0)
                .and_then(|_| file.write_all(owner.as_bytes()))
                .and_then(|_| file.flush());
        }

        debug!(lock = %path.display(), ?mode, "acquired directory lock");
        Ok(Self { file, path, mode })
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
