//! chat-archiver - backups for a local AI-conversation store
//!
//! This library reads conversation records from the terminal's SQLite store
//! and keeps a rolling set of full and incremental backups of them in a
//! local directory, with verification, retention and restore.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `models`: Records, artifacts and catalog entries
//! - `source`: Read access to the conversation store
//! - `storage`: Atomic file writes
//! - `backup`: Backup engine, retention and restore
//! - `cli`: Command handlers for the `chat-archive` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use archiver::config::{ArchiverPaths, Settings};
//!
//! let paths = ArchiverPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod source;
pub mod storage;

pub use error::{ArchiveError, ArchiveResult};
