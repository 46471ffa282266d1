use async_trait::async_trait;

use crate::domain::CheckpointFileLink;
use crate::error::Result;

/// Repository over `checkpoint_files` links (spec §4.4).
#[async_trait]
pub trait CheckpointFileRepository: Send + Sync {
    async fn add(&mut self, link: CheckpointFileLink) -> Result<()>;
    async fn get_for_checkpoint(&mut self, checkpoint_id: &str) -> Result<Option<CheckpointFileLink>>;
    async fn list_all(&mut self) -> Result<Vec<CheckpointFileLink>>;
    async fn delete_for_checkpoint(&mut self, checkpoint_id: &str) -> Result<()>;
}
