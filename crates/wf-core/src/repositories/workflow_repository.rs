use async_trait::async_trait;

use crate::domain::Workflow;
use crate::error::Result;

/// Repository over the `workflows` aggregate.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn add(&mut self, workflow: Workflow) -> Result<()>;
    async fn get_by_id(&mut self, id: &str) -> Result<Workflow>;
    async fn update(&mut self, workflow: Workflow) -> Result<()>;
    async fn list(&mut self) -> Result<Vec<Workflow>>;
}
