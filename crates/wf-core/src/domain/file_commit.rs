//! Content-addressed file snapshots (spec §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One tracked file within a [`FileCommit`], addressed by the sha256 of its
/// contents rather than by copying the contents into the commit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub blob_hash: String,
    pub size_bytes: i64,
}

/// A point-in-time snapshot of a set of files, referenced by a
/// [`super::checkpoint_file::CheckpointFileLink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCommit {
    pub id: String,
    pub entries: Vec<FileEntry>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FileCommit {
    pub fn new(id: impl Into<String>, entries: Vec<FileEntry>, message: Option<String>) -> Self {
        Self {
            id: id.into(),
            entries,
            message,
            created_at: Utc::now(),
        }
    }

    pub fn total_size_bytes(&self) -> i64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }
}

/// The content-addressed bytes behind a [`FileEntry::blob_hash`]. Distinct
/// commits sharing a file deduplicate down to one [`Blob`] row (spec C6's
/// "insert if absent" rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub hash: String,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Blob {
    pub fn new(hash: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            hash: hash.into(),
            bytes,
            created_at: Utc::now(),
        }
    }
}
