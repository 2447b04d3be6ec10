//! Backup system for the chat archiver
//!
//! Creates full and incremental backups of the conversation store, verifies
//! them, applies retention and restores record sets from artifact chains.
//!
//! # Architecture
//!
//! - `codec`: artifact container format (JSON, optionally gzip)
//! - `catalog`: the persisted index of artifacts in a backup directory
//! - `lock`: advisory directory lock serializing writers
//! - `retention`: pure selection of chains to delete
//! - `engine`: `BackupEngine`, which ties the above together
//! - `restore`: chain replay
//!
//! # Backup Directory
//!
//! ```text
//! backups/
//!   catalog.json
//!   .lock
//!   full-20261014T101500.123456789Z.json.gz
//!   incremental-20261014T111500.000000001Z.json.gz
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use archiver::backup::{BackupEngine, EngineOptions, RetentionConfig};
//! use archiver::source::SqliteSource;
//!
//! let source = SqliteSource::new("/path/to/warp.sqlite");
//! let mut engine = BackupEngine::open(source, EngineOptions::new("/path/to/backups"))?;
//!
//! let artifact = engine.create_incremental()?;
//! let report = engine.apply_retention(&RetentionConfig::default())?;
//! println!("{} deleted", report.deleted.len());
//! ```

pub mod catalog;
pub mod codec;
pub mod engine;
pub mod lock;
pub mod restore;
pub mod retention;

pub use catalog::BackupCatalog;
pub use engine::{
    BackupEngine, BackupStats, DeleteFailure, EngineOptions, RecoveryReport, RetentionReport,
    VerifyOutcome,
};
pub use lock::{DirLock, LockMode};
pub use restore::RestoreResult;
pub use retention::{Chain, RetentionConfig, RetentionPlan};
