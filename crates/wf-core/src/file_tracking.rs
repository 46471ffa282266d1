//! Content-addressed file tracking (spec §4.4, C6).
//!
//! Hashing and the blob "insert if absent" rule are grounded in `sha2`
//! usage across the example pack; the commit/link/restore shape follows
//! `original_source/wtb/application/services/batch_execution_coordinator.py`'s
//! description of file commits travelling alongside checkpoints.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::{Blob, CheckpointFileLink, FileCommit, FileEntry};
use crate::error::{CoreError, Result};
use crate::repositories::{BlobRepository, CheckpointFileRepository, FileCommitRepository};
use crate::uow::UnitOfWorkFactory;

pub struct FileTrackingService {
    factory: Arc<dyn UnitOfWorkFactory>,
    root: PathBuf,
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl FileTrackingService {
    pub fn new(factory: Arc<dyn UnitOfWorkFactory>, root: PathBuf) -> Self {
        Self { factory, root }
    }

    /// Hashes and stores every file under `paths` (relative to `root`),
    /// deduplicating identical contents into a single blob, and records a
    /// new [`FileCommit`] with an explicit `commit_id`.
    pub async fn track_files(&self, commit_id: &str, paths: &[PathBuf], message: Option<String>) -> Result<FileCommit> {
        let mut entries = Vec::with_capacity(paths.len());
        let mut uow = self.factory.begin().await?;
        for rel_path in paths {
            let full_path = self.root.join(rel_path);
            let bytes = tokio::fs::read(&full_path).await?;
            let hash = hash_bytes(&bytes);
            let size_bytes = bytes.len() as i64;
            uow.blobs().put_if_absent(Blob::new(hash.clone(), bytes)).await?;
            entries.push(FileEntry {
                path: rel_path.to_string_lossy().to_string(),
                blob_hash: hash,
                size_bytes,
            });
        }
        let commit = FileCommit::new(commit_id, entries, message);
        uow.file_commits().add(commit.clone()).await?;
        uow.commit().await?;
        debug!(commit_id, files = paths.len(), "tracked files into commit");
        Ok(commit)
    }

    /// Tracks files and links the resulting commit to `checkpoint_id` in the
    /// same unit of work, so the link can never reference a commit that
    /// failed to persist (spec I-series invariant on dangling references).
    pub async fn track_and_link(
        &self,
        commit_id: &str,
        checkpoint_id: &str,
        paths: &[PathBuf],
        message: Option<String>,
    ) -> Result<FileCommit> {
        let mut entries = Vec::with_capacity(paths.len());
        let mut uow = self.factory.begin().await?;
        for rel_path in paths {
            let full_path = self.root.join(rel_path);
            let bytes = tokio::fs::read(&full_path).await?;
            let hash = hash_bytes(&bytes);
            let size_bytes = bytes.len() as i64;
            uow.blobs().put_if_absent(Blob::new(hash.clone(), bytes)).await?;
            entries.push(FileEntry {
                path: rel_path.to_string_lossy().to_string(),
                blob_hash: hash,
                size_bytes,
            });
        }
        let commit = FileCommit::new(commit_id, entries, message);
        uow.file_commits().add(commit.clone()).await?;
        uow.checkpoint_files()
            .add(CheckpointFileLink::new(
                checkpoint_id,
                commit_id,
                commit.entries.len() as i64,
                commit.total_size_bytes(),
            ))
            .await?;
        uow.commit().await?;
        Ok(commit)
    }

    /// Writes every file in `commit` back out under `root`, fetching blob
    /// bytes by hash. Used as the best-effort Phase 2 step after a rollback
    /// (spec §4.6).
    pub async fn restore_commit(&self, commit: &FileCommit) -> Result<()> {
        let mut uow = self.factory.begin().await?;
        for entry in &commit.entries {
            let blob = uow
                .blobs()
                .get_by_hash(&entry.blob_hash)
                .await?
                .ok_or_else(|| CoreError::CorruptState(format!("missing blob {}", entry.blob_hash)))?;
            let dest = self.root.join(&entry.path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file_name = dest
                .file_name()
                .ok_or_else(|| CoreError::CorruptState(format!("invalid restore path for {}", entry.path)))?;
            let tmp_path = dest.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
            tokio::fs::write(&tmp_path, &blob.bytes).await?;
            tokio::fs::rename(&tmp_path, &dest).await?;
        }
        uow.commit().await
    }

    pub async fn get_files_at_checkpoint(&self, checkpoint_id: &str) -> Result<Option<FileCommit>> {
        let mut uow = self.factory.begin().await?;
        let link = uow.checkpoint_files().get_for_checkpoint(checkpoint_id).await?;
        let commit = match link {
            Some(link) => Some(uow.file_commits().get_by_id(&link.file_commit_id).await?),
            None => None,
        };
        uow.commit().await?;
        Ok(commit)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uow::{InMemoryDatabase, InMemoryUnitOfWorkFactory};
    use tempfile::tempdir;

    #[tokio::test]
    async fn tracking_identical_files_deduplicates_the_blob() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"same contents").await.unwrap();
        tokio::fs::write(dir.path().join("b.txt"), b"same contents").await.unwrap();

        let factory = Arc::new(InMemoryUnitOfWorkFactory::new(InMemoryDatabase::new()));
        let service = FileTrackingService::new(factory.clone(), dir.path().to_path_buf());
        let commit = service
            .track_files("commit-1", &[PathBuf::from("a.txt"), PathBuf::from("b.txt")], None)
            .await
            .unwrap();

        assert_eq!(commit.entries[0].blob_hash, commit.entries[1].blob_hash);
    }

    #[tokio::test]
    async fn restore_commit_writes_bytes_back_to_disk() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"hello").await.unwrap();

        let factory = Arc::new(InMemoryUnitOfWorkFactory::new(InMemoryDatabase::new()));
        let service = FileTrackingService::new(factory.clone(), dir.path().to_path_buf());
        let commit = service.track_files("commit-1", &[PathBuf::from("a.txt")], None).await.unwrap();

        tokio::fs::remove_file(dir.path().join("a.txt")).await.unwrap();
        service.restore_commit(&commit).await.unwrap();

        let restored = tokio::fs::read(dir.path().join("a.txt")).await.unwrap();
        assert_eq!(restored, b"hello");
    }
}
