use async_trait::async_trait;

use crate::domain::NodeBoundary;
use crate::error::Result;

/// Repository over `node_boundaries` (spec §4.2's `NODE_BOUNDARY_SYNC`).
#[async_trait]
pub trait NodeBoundaryRepository: Send + Sync {
    async fn add(&mut self, boundary: NodeBoundary) -> Result<NodeBoundary>;
    async fn update(&mut self, boundary: NodeBoundary) -> Result<()>;
    async fn get_open_for_session(&mut self, session_id: i64) -> Result<Option<NodeBoundary>>;
    async fn list_for_execution(&mut self, execution_id: &str) -> Result<Vec<NodeBoundary>>;
}
