//! Backup artifact and catalog entry models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ArtifactId;

/// Kind of backup artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Every record in the source store
    Full,
    /// Records changed since the baseline artifact
    Incremental,
}

impl ArtifactKind {
    /// File-name and id prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Full => "full",
            ArtifactKind::Incremental => "incremental",
        }
    }

    /// Parse a file-name prefix
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "full" => Some(ArtifactKind::Full),
            "incremental" => Some(ArtifactKind::Incremental),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Full => write!(f, "Full"),
            ArtifactKind::Incremental => write!(f, "Incremental"),
        }
    }
}

/// One backup output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub created_at: DateTime<Utc>,

    /// When the source was read; earlier than `created_at` only when the
    /// clock lagged the newest catalog entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,

    /// Artifact this one was computed against (`None` for full backups)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<ArtifactId>,

    pub compressed: bool,

    /// Hex SHA-256 of the stored bytes
    pub checksum: String,

    pub record_count: usize,
    pub size_bytes: u64,

    /// File name relative to the backup directory
    pub file_name: String,
}

impl Artifact {
    /// File name for an artifact with the given id
    pub fn file_name_for(id: &ArtifactId, compressed: bool) -> String {
        if compressed {
            format!("{}.json.gz", id)
        } else {
            format!("{}.json", id)
        }
    }

    pub fn is_full(&self) -> bool {
        self.kind == ArtifactKind::Full
    }

    /// Lower bound for the records of an incremental built on this artifact
    pub fn captured_since(&self) -> DateTime<Utc> {
        self.captured_at.unwrap_or(self.created_at)
    }
}

/// Lifecycle state of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Write started, not yet verified
    Pending,
    /// Round-trip decode and checksum confirmed
    Verified,
    /// Creation failed; the entry is about to be removed
    Failed,
    /// Was verified once, later failed verification
    Corrupt,
}

impl EntryStatus {
    /// Whether the entry describes a finished artifact on disk
    pub fn is_committed(&self) -> bool {
        matches!(self, EntryStatus::Verified | EntryStatus::Corrupt)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryStatus::Pending => write!(f, "pending"),
            EntryStatus::Verified => write!(f, "verified"),
            EntryStatus::Failed => write!(f, "failed"),
            EntryStatus::Corrupt => write!(f, "corrupt"),
        }
    }
}

/// Persisted projection of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub artifact: Artifact,

    pub status: EntryStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

impl CatalogEntry {
    pub fn pending(artifact: Artifact) -> Self {
        Self {
            artifact,
            status: EntryStatus::Pending,
            verified_at: None,
        }
    }

    pub fn id(&self) -> &ArtifactId {
        &self.artifact.id
    }
}
