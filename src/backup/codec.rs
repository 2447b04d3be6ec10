//! Artifact encoding
//!
//! An artifact is a JSON container of records, optionally gzip-compressed.
//! Decoding sniffs the gzip magic bytes, so compressed and uncompressed
//! artifacts can sit side by side in one backup directory.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ArchiveError, ArchiveResult};
use crate::models::Record;

/// Format tag written into every container
pub const FORMAT_TAG: &str = "chat-archiver";

/// Current container schema version
pub const SCHEMA_VERSION: u32 = 1;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Serialize)]
struct ContainerRef<'a> {
    format: &'a str,
    schema_version: u32,
    record_count: usize,
    records: &'a [Record],
}

#[derive(Deserialize)]
struct Container {
    format: String,
    schema_version: u32,
    record_count: usize,
    records: Vec<Record>,
}

/// Serialize `records`, gzip-compressing the result when `compress` is set
pub fn encode(records: &[Record], compress: bool) -> ArchiveResult<Vec<u8>> {
    let container = ContainerRef {
        format: FORMAT_TAG,
        schema_version: SCHEMA_VERSION,
        record_count: records.len(),
        records,
    };
    let json = serde_json::to_vec(&container)
        .map_err(|e| ArchiveError::Json(format!("Failed to serialize records: {}", e)))?;

    if !compress {
        return Ok(json);
    }

    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map_err(|e| ArchiveError::Io(format!("Failed to compress artifact: {}", e)))
}

/// Whether `bytes` start with the gzip magic
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Decode an artifact, returning its records and record count
///
/// Zero-length input is an empty record set, not an error.
pub fn decode(bytes: &[u8]) -> ArchiveResult<(Vec<Record>, usize)> {
    if bytes.is_empty() {
        return Ok((Vec::new(), 0));
    }

    let json = if is_compressed(bytes) {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| ArchiveError::MalformedArtifact(format!("Bad gzip stream: {}", e)))?;
        out
    } else {
        bytes.to_vec()
    };

    let container: Container = serde_json::from_slice(&json)
        .map_err(|e| ArchiveError::MalformedArtifact(format!("Bad container: {}", e)))?;

    if container.format != FORMAT_TAG {
        return Err(ArchiveError::MalformedArtifact(format!(
            "Unknown format tag '{}'",
            container.format
        )));
    }
    if container.schema_version > SCHEMA_VERSION {
        return Err(ArchiveError::MalformedArtifact(format!(
            "Unsupported schema version {} (max {})",
            container.schema_version, SCHEMA_VERSION
        )));
    }
    if container.record_count != container.records.len() {
        return Err(ArchiveError::MalformedArtifact(format!(
            "Header declares {} records, found {}",
            container.record_count,
            container.records.len()
        )));
    }

    let count = container.records.len();
    Ok((container.records, count))
}

/// Lowercase hex SHA-256 of `bytes`
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
