use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::record::Record;

/// An immutable, content-hashed snapshot of a source's accepted records.
///
/// Identical record sets always hash identically regardless of input
/// ordering; the hash is the dedup and idempotence key. Duplicate content
/// across cycles is still a new event in the version history, so
/// `created_at` distinguishes entries with equal hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedBatch {
    pub source: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub records: Vec<Record>,
}

impl VersionedBatch {
    pub fn new(source: impl Into<String>, records: Vec<Record>) -> Self {
        let content_hash = content_hash(&records);
        Self {
            source: source.into(),
            content_hash,
            created_at: Utc::now(),
            records,
        }
    }

    /// First eight hex characters of the content hash, used in file names.
    pub fn short_hash(&self) -> &str {
        &self.content_hash[..8]
    }
}

/// Content hash over a canonical, order-independent serialization: each
/// record serializes with sorted keys, the record strings are sorted, and
/// the concatenation is hashed.
pub fn content_hash(records: &[Record]) -> String {
    let mut serialized: Vec<String> = records
        .iter()
        .map(|r| serde_json::to_string(r).unwrap_or_default())
        .collect();
    serialized.sort();

    let mut hasher = Sha256::new();
    for s in &serialized {
        hasher.update(s.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// The repointable "latest" reference for a source. Written whole to a
/// temporary file and renamed into place, so readers never observe a
/// half-updated pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestPointer {
    pub source: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub record_count: usize,
    pub version_path: std::path::PathBuf,
}
