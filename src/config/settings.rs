//! User settings for the archiver
//!
//! Manages the source database location, backup directory, compression and
//! backup retention policies.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::{default_source_db, ArchiverPaths};
use crate::backup::retention::RetentionConfig;
use crate::error::ArchiveError;

/// Backup retention settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Delete chains whose full backup is older than this many days
    #[serde(default = "default_max_age_days")]
    pub max_age_days: Option<u32>,

    /// Number of full-backup chains to keep
    #[serde(default = "default_max_count")]
    pub max_count: Option<u32>,
}

fn default_max_age_days() -> Option<u32> {
    Some(30)
}

fn default_max_count() -> Option<u32> {
    Some(10)
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            max_count: default_max_count(),
        }
    }
}

impl RetentionSettings {
    /// Convert to the engine's retention config
    pub fn to_config(&self) -> RetentionConfig {
        RetentionConfig {
            max_age: self
                .max_age_days
                .map(|days| chrono::Duration::days(i64::from(days))),
            max_count: self.max_count.map(|count| count as usize),
        }
    }
}

/// Backup behaviour settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Gzip artifacts
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Apply retention after every successful backup
    #[serde(default = "default_true")]
    pub auto_prune: bool,

    #[serde(default)]
    pub retention: RetentionSettings,
}

fn default_true() -> bool {
    true
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            compress: true,
            auto_prune: true,
            retention: RetentionSettings::default(),
        }
    }
}

/// User settings for the archiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Conversation database to back up (defaults to the terminal's own)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_db_path: Option<PathBuf>,

    /// Where artifacts and the catalog live (defaults to `<base>/backups`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    #[serde(default)]
    pub backup: BackupSettings,

    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_schema_version() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            source_db_path: None,
            backup_dir: None,
            backup: BackupSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &ArchiverPaths) -> Result<Self, ArchiveError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                ArchiveError::Io(format!("Failed to read settings file: {}", e))
            })?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                ArchiveError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            settings.backup.retention.to_config().validate()?;
            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &ArchiverPaths) -> Result<(), ArchiveError> {
        paths.ensure_directories()?;

        let settings_path = paths.settings_file();
        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            ArchiveError::Config(format!("Failed to serialize settings: {}", e))
        })?;

        std::fs::write(&settings_path, contents).map_err(|e| {
            ArchiveError::Io(format!("Failed to write settings file: {}", e))
        })?;

        Ok(())
    }

    /// Backup directory, falling back to the default under the base dir
    pub fn resolved_backup_dir(&self, paths: &ArchiverPaths) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| paths.backup_dir())
    }

    /// Source database, falling back to the terminal's default location
    pub fn resolved_source_db(&self) -> Result<PathBuf, ArchiveError> {
        match &self.source_db_path {
            Some(path) => Ok(path.clone()),
            None => default_source_db(),
        }
    }
}
