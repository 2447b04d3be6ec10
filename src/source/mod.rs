//! Read-only access to the live conversation store
//!
//! The backup engine only ever reads through [`SourceStore`]. Implementations
//! must fail with [`ArchiveError::SourceUnavailable`] when the backing store
//! cannot be opened, never return an empty or partial set instead.
//!
//! [`ArchiveError::SourceUnavailable`]: crate::error::ArchiveError::SourceUnavailable

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::ArchiveResult;
use crate::models::Record;

mod memory;
mod sqlite;

pub use memory::MemorySource;
pub use sqlite::{SourceStats, SqliteSource};

/// Read-only accessor over the live data store
pub trait SourceStore {
    /// Every record in the store
    fn all_records(&self) -> ArchiveResult<Vec<Record>>;

    /// Records modified strictly after `since`
    fn records_since(&self, since: DateTime<Utc>) -> ArchiveResult<Vec<Record>>;

    /// Copy the entire store into a standalone file at `dest`
    fn snapshot_to(&self, dest: &Path) -> ArchiveResult<()>;
}

impl<S: SourceStore + ?Sized> SourceStore for &S {
    fn all_records(&self) -> ArchiveResult<Vec<Record>> {
        (**self).all_records()
    }

    fn records_since(&self, since: DateTime<Utc>) -> ArchiveResult<Vec<Record>> {
        (**self).records_since(since)
    }

    fn snapshot_to(&self, dest: &Path) -> ArchiveResult<()> {
        (**self).snapshot_to(dest)
    }
}

impl<S: SourceStore + ?Sized> SourceStore for Box<S> {
    fn all_records(&self) -> ArchiveResult<Vec<Record>> {
        (**self).all_records()
    }

    fn records_since(&self, since: DateTime<Utc>) -> ArchiveResult<Vec<Record>> {
        (**self).records_since(since)
    }

    fn snapshot_to(&self, dest: &Path) -> ArchiveResult<()> {
        (**self).snapshot_to(dest)
    }
}
