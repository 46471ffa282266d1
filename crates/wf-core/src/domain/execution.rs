//! Execution records and their state machine (spec §3, I1, C9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `PENDING -> RUNNING -> {PAUSED, COMPLETED, FAILED} | CANCELLED`.
///
/// `CANCELLED` is reachable from any non-terminal state (spec §3 lifecycle);
/// `COMPLETED`, `FAILED`, and `CANCELLED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition under the state machine
    /// in spec §3. Rollback and fork do not transition status themselves;
    /// they operate on checkpoint state and are validated separately by the
    /// execution controller.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (_, Cancelled) => !self.is_terminal(),
            (Pending, Running) => true,
            (Running, Paused | Completed | Failed) => true,
            (Paused, Running) => true,
            _ => false,
        }
    }
}

/// A single run of a [`super::workflow::Workflow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    /// Checkpoint-store session id (spec C5), assigned once the execution
    /// is initialized against the checkpoint store. Stays `None` for an
    /// execution that was created but never started.
    pub session_id: Option<i64>,
    pub current_node_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    /// Optimistic-concurrency version (spec §4.1). Bumped by the repository
    /// on every `update`; a caller updating against a stale version gets
    /// `CoreError::StaleState` instead of silently clobbering a concurrent
    /// writer.
    pub version: i64,
}

impl Execution {
    pub fn new(id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            session_id: None,
            current_node_id: None,
            created_at: now,
            updated_at: now,
            error_message: None,
            version: 0,
        }
    }
}
