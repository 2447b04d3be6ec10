//! Configuration module for the archiver
//!
//! This module provides configuration management including:
//! - XDG-compliant path resolution
//! - User settings persistence
//! - Backup and retention preferences

pub mod paths;
pub mod settings;

pub use paths::ArchiverPaths;
pub use settings::{BackupSettings, RetentionSettings, Settings};
