//! Node-entry/exit bookkeeping used to reconcile the checkpoint store's tool
//! track against this system's own record (spec §4.2's `NODE_BOUNDARY_SYNC`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoundaryStatus {
    Started,
    Completed,
    Failed,
}

/// One node's entry-to-exit span within an execution's session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeBoundary {
    pub id: Option<i64>,
    pub execution_id: String,
    pub session_id: i64,
    pub node_id: String,
    pub entry_checkpoint_id: String,
    pub exit_checkpoint_id: Option<String>,
    pub status: BoundaryStatus,
    pub tool_count: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl NodeBoundary {
    pub fn started(
        execution_id: impl Into<String>,
        session_id: i64,
        node_id: impl Into<String>,
        entry_checkpoint_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            execution_id: execution_id.into(),
            session_id,
            node_id: node_id.into(),
            entry_checkpoint_id: entry_checkpoint_id.into(),
            exit_checkpoint_id: None,
            status: BoundaryStatus::Started,
            tool_count: 0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }

    pub fn complete(&mut self, exit_checkpoint_id: impl Into<String>) {
        self.exit_checkpoint_id = Some(exit_checkpoint_id.into());
        self.status = BoundaryStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error_message: impl Into<String>) {
        self.status = BoundaryStatus::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(Utc::now());
    }
}
