//! Path management for the archiver
//!
//! Provides XDG-compliant path resolution for configuration and backups.
//!
//! ## Path Resolution Order
//!
//! 1. `CHAT_ARCHIVER_DATA_DIR` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/chat-archiver` or `~/.config/chat-archiver`
//! 3. Windows: `%APPDATA%\chat-archiver`

use std::path::PathBuf;

use directories::BaseDirs;

use crate::error::ArchiveError;

/// Environment variable overriding the base directory
pub const DATA_DIR_ENV: &str = "CHAT_ARCHIVER_DATA_DIR";

/// Manages all paths used by the archiver
#[derive(Debug, Clone)]
pub struct ArchiverPaths {
    /// Base directory for settings and the default backup directory
    base_dir: PathBuf,
}

impl ArchiverPaths {
    /// Create a new ArchiverPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, ArchiveError> {
        let base_dir = if let Ok(custom) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create ArchiverPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.config/chat-archiver/ or equivalent)
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the default backup directory (~/.config/chat-archiver/backups/)
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Ensure the base directory exists
    pub fn ensure_directories(&self) -> Result<(), ArchiveError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| ArchiveError::Io(format!("Failed to create base directory: {}", e)))
    }

    /// Check if settings have been written
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}

/// Default location of the terminal's conversation database
pub fn default_source_db() -> Result<PathBuf, ArchiveError> {
    let dirs = BaseDirs::new()
        .ok_or_else(|| ArchiveError::Config("Could not determine home directory".into()))?;
    Ok(dirs
        .home_dir()
        .join(".local")
        .join("state")
        .join("warp-terminal")
        .join("warp.sqlite"))
}

/// Resolve the default base directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, ArchiveError> {
    let config_base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => BaseDirs::new()
            .ok_or_else(|| ArchiveError::Config("Could not determine home directory".into()))?
            .home_dir()
            .join(".config"),
    };
    Ok(config_base.join("chat-archiver"))
}

/// Resolve the default base directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, ArchiveError> {
    let dirs = BaseDirs::new()
        .ok_or_else(|| ArchiveError::Config("Could not determine APPDATA directory".into()))?;
    Ok(dirs.config_dir().join("chat-archiver"))
}
