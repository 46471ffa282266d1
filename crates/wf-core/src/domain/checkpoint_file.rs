//! Link between a checkpoint and the file-system commit taken alongside it
//! (spec §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Associates a checkpoint id (owned by the external checkpoint store, spec
/// §1) with a [`super::file_commit::FileCommit`] (owned by this system),
/// recording how many files and bytes were captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFileLink {
    pub checkpoint_id: String,
    pub file_commit_id: String,
    pub file_count: i64,
    pub total_size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl CheckpointFileLink {
    pub fn new(
        checkpoint_id: impl Into<String>,
        file_commit_id: impl Into<String>,
        file_count: i64,
        total_size_bytes: i64,
    ) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            file_commit_id: file_commit_id.into(),
            file_count,
            total_size_bytes,
            created_at: Utc::now(),
        }
    }
}
