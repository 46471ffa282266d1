use async_trait::async_trait;

use crate::domain::NodeVariant;
use crate::error::Result;

/// Repository over the `node_variants` aggregate (batch/A-B test arms).
#[async_trait]
pub trait VariantRepository: Send + Sync {
    async fn add(&mut self, variant: NodeVariant) -> Result<()>;
    async fn get_by_id(&mut self, id: &str) -> Result<NodeVariant>;
    async fn update(&mut self, variant: NodeVariant) -> Result<()>;
    async fn list_for_node(&mut self, workflow_id: &str, node_id: &str) -> Result<Vec<NodeVariant>>;
    async fn get_active(&mut self, workflow_id: &str, node_id: &str) -> Result<Option<NodeVariant>>;
}
