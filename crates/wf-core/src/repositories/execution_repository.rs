use async_trait::async_trait;

use crate::domain::Execution;
use crate::error::Result;

/// Repository over the `executions` aggregate.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn add(&mut self, execution: Execution) -> Result<()>;
    async fn get_by_id(&mut self, id: &str) -> Result<Execution>;
    async fn update(&mut self, execution: Execution) -> Result<()>;
    async fn list_by_workflow(&mut self, workflow_id: &str) -> Result<Vec<Execution>>;
    async fn list_running(&mut self) -> Result<Vec<Execution>>;
}
