use async_trait::async_trait;

use crate::domain::FileCommit;
use crate::error::Result;

/// Repository over `file_commits` (spec §4.4).
#[async_trait]
pub trait FileCommitRepository: Send + Sync {
    async fn add(&mut self, commit: FileCommit) -> Result<()>;
    async fn get_by_id(&mut self, id: &str) -> Result<FileCommit>;
    async fn list_all(&mut self) -> Result<Vec<FileCommit>>;
}
