//! Storage helpers
//!
//! Atomic JSON writes and synced raw writes used by the catalog and the
//! artifact writer.

pub mod file_io;

pub use file_io::{read_json, write_json_atomic};
