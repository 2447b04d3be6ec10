//! Custom error types for the archiver
//!
//! Every public operation returns [`ArchiveResult`]. Low-level I/O and
//! serialization faults are converted into [`ArchiveError`] variants at the
//! module boundary so callers always get a typed, scriptable outcome.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for archiver operations
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors outside artifact creation
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// The live conversation store could not be opened or read
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Writing an artifact (or the catalog) failed
    #[error("Write failed for {artifact}: {reason}")]
    WriteFailure { artifact: String, reason: String },

    /// A freshly written or stored artifact did not round-trip
    #[error("Verification failed for {artifact}: {reason}")]
    VerificationFailure { artifact: String, reason: String },

    /// An existing artifact file could not be decoded
    #[error("Malformed artifact: {0}")]
    MalformedArtifact(String),

    /// Another operation holds the backup directory lock
    #[error("Backup already in progress (lock held on {})", .0.display())]
    BackupInProgress(PathBuf),

    /// A single artifact could not be removed by retention
    #[error("Could not delete {artifact}: {reason}")]
    RetentionDeleteFailure { artifact: String, reason: String },

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Duplicate entity errors
    #[error("{entity_type} already exists: {identifier}")]
    Duplicate {
        entity_type: &'static str,
        identifier: String,
    },

    /// The catalog index is unreadable or inconsistent
    #[error("Catalog error: {0}")]
    Catalog(String),
}

impl ArchiveError {
    /// Create a "not found" error for artifacts
    pub fn artifact_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Artifact",
            identifier: identifier.into(),
        }
    }

    /// Create a write failure for the given artifact
    pub fn write_failure(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteFailure {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Create a verification failure for the given artifact
    pub fn verification_failure(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::VerificationFailure {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is lock contention
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::BackupInProgress(_))
    }

    /// Process exit code for scripting; each kind is distinguishable
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Io(_) | Self::Json(_) => 1,
            Self::Config(_) => 2,
            Self::SourceUnavailable(_) => 10,
            Self::WriteFailure { .. } => 11,
            Self::VerificationFailure { .. } => 12,
            Self::MalformedArtifact(_) => 13,
            Self::BackupInProgress(_) => 14,
            Self::RetentionDeleteFailure { .. } => 15,
            Self::NotFound { .. } => 16,
            Self::Duplicate { .. } => 17,
            Self::Catalog(_) => 18,
        }
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for archiver operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;
