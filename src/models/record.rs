//! Conversation record model
//!
//! A record is one archived conversation as read from the source store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One archived conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique conversation identifier
    pub id: String,

    /// When the conversation was last modified in the source store
    pub last_modified: DateTime<Utc>,

    /// Opaque conversation payload
    pub payload: serde_json::Value,

    /// Size of the raw payload in the source store
    pub size_bytes: u64,
}

impl Record {
    /// Create a record, computing its size from the serialized payload
    pub fn new(
        id: impl Into<String>,
        last_modified: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        let size_bytes = payload.to_string().len() as u64;
        Self {
            id: id.into(),
            last_modified,
            payload,
            size_bytes,
        }
    }

    /// Whether this record changed strictly after `since`
    pub fn modified_after(&self, since: DateTime<Utc>) -> bool {
        self.last_modified > since
    }
}
