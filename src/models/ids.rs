//! Artifact identifiers
//!
//! An artifact id is derived from the artifact kind and its creation time,
//! e.g. `incremental-20261014T101500.123456789Z`. The timestamp uses the ISO
//! 8601 basic format so the id doubles as a portable file-name stem.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::ArtifactKind;
use crate::error::ArchiveError;

/// strftime pattern for the timestamp part of an id
pub const ID_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.9fZ";

/// Identifier of a backup artifact
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Build the id for an artifact of `kind` created at `created_at`
    pub fn new(kind: ArtifactKind, created_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}",
            kind.prefix(),
            created_at.format(ID_TIMESTAMP_FORMAT)
        ))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the id back into its kind and timestamp
    pub fn parts(&self) -> Option<(ArtifactKind, DateTime<Utc>)> {
        let (prefix, stamp) = self.0.split_once('-')?;
        let kind = ArtifactKind::from_prefix(prefix)?;
        let naive = NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S%.fZ").ok()?;
        Some((kind, DateTime::from_naive_utc_and_offset(naive, Utc)))
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArtifactId {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept a file name as well as a bare id
        let stem = s
            .trim()
            .trim_end_matches(".gz")
            .trim_end_matches(".json");
        let id = Self(stem.to_string());
        if id.parts().is_none() {
            return Err(ArchiveError::Config(format!("Invalid artifact id: {}", s)));
        }
        Ok(id)
    }
}

impl AsRef<str> for ArtifactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
