//! Core data models
//!
//! Conversation records read from the source store, and the artifacts and
//! catalog entries the backup engine produces from them.

pub mod artifact;
pub mod ids;
pub mod record;

pub use artifact::{Artifact, ArtifactKind, CatalogEntry, EntryStatus};
pub use ids::ArtifactId;
pub use record::Record;
