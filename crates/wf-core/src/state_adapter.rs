//! The state adapter (spec §4.3, C5): the anti-corruption boundary between
//! this system's own stores and the external checkpoint store.
//!
//! Every method here that changes both stores follows the Phase 1/Phase 2
//! split of spec §4.6: the checkpoint-store call happens first (it is the
//! source of truth for execution state), then the local record (node
//! boundary, checkpoint/file link) and its outbox audit event commit
//! together in one unit of work.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{CheckpointFileLink, NodeBoundary, OutboxEvent, OutboxEventType};
use crate::error::Result;
use crate::repositories::{CheckpointFileRepository, NodeBoundaryRepository, OutboxRepository};
use crate::uow::UnitOfWorkFactory;
use wf_checkpoint::{CheckpointRecord, CheckpointStore, ExecutionState, SaveTrigger};

pub struct StateAdapter {
    checkpoints: Arc<dyn CheckpointStore>,
    factory: Arc<dyn UnitOfWorkFactory>,
    max_retries: u32,
}

impl StateAdapter {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>, factory: Arc<dyn UnitOfWorkFactory>, max_retries: u32) -> Self {
        Self {
            checkpoints,
            factory,
            max_retries,
        }
    }

    pub async fn initialize_session(&self, execution_id: &str, initial_state: ExecutionState) -> Result<i64> {
        let session_id = self.checkpoints.initialize_session(execution_id, initial_state).await?;
        debug!(execution_id, session_id, "checkpoint session initialized");
        Ok(session_id)
    }

    pub async fn save_checkpoint(
        &self,
        session_id: i64,
        state: ExecutionState,
        node_id: Option<String>,
        trigger: SaveTrigger,
        name: Option<String>,
    ) -> Result<CheckpointRecord> {
        let record = self
            .checkpoints
            .save_checkpoint(session_id, state, node_id, trigger, name, Default::default())
            .await?;

        let mut uow = self.factory.begin().await?;
        uow.outbox()
            .add(OutboxEvent::new(
                OutboxEventType::CheckpointSaved,
                "checkpoint",
                record.id.clone(),
                serde_json::json!({"checkpoint_id": record.id, "session_id": session_id}),
                None,
                self.max_retries,
            ))
            .await?;
        uow.commit().await?;
        Ok(record)
    }

    pub async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<CheckpointRecord> {
        Ok(self.checkpoints.load_checkpoint(checkpoint_id).await?)
    }

    pub async fn get_checkpoints(&self, session_id: i64, node_id: Option<&str>) -> Result<Vec<CheckpointRecord>> {
        Ok(self.checkpoints.get_checkpoints(session_id, node_id).await?)
    }

    /// Links a checkpoint to the file commit taken alongside it (spec §4.4),
    /// recording the link and a verification outbox event atomically.
    pub async fn link_file_commit(&self, link: CheckpointFileLink) -> Result<()> {
        let mut uow = self.factory.begin().await?;
        let checkpoint_id = link.checkpoint_id.clone();
        uow.checkpoint_files().add(link).await?;
        uow.outbox()
            .add(OutboxEvent::new(
                OutboxEventType::CheckpointFileLinkVerify,
                "checkpoint_file_link",
                checkpoint_id.clone(),
                serde_json::json!({"checkpoint_id": checkpoint_id}),
                None,
                self.max_retries,
            ))
            .await?;
        uow.commit().await
    }

    pub async fn mark_node_started(
        &self,
        execution_id: &str,
        session_id: i64,
        node_id: &str,
        entry_checkpoint_id: &str,
    ) -> Result<NodeBoundary> {
        let boundary = NodeBoundary::started(execution_id, session_id, node_id, entry_checkpoint_id);
        let mut uow = self.factory.begin().await?;
        let saved = uow.node_boundaries().add(boundary).await?;
        uow.outbox()
            .add(OutboxEvent::new(
                OutboxEventType::NodeBoundarySync,
                "node_boundary",
                saved.id.map(|i| i.to_string()).unwrap_or_default(),
                serde_json::json!({"session_id": session_id, "node_id": node_id}),
                None,
                self.max_retries,
            ))
            .await?;
        uow.commit().await?;
        Ok(saved)
    }

    pub async fn mark_node_completed(&self, mut boundary: NodeBoundary, exit_checkpoint_id: &str) -> Result<()> {
        boundary.complete(exit_checkpoint_id);
        let mut uow = self.factory.begin().await?;
        uow.node_boundaries().update(boundary).await?;
        uow.commit().await
    }

    pub async fn mark_node_failed(&self, mut boundary: NodeBoundary, error_message: &str) -> Result<()> {
        boundary.fail(error_message);
        let mut uow = self.factory.begin().await?;
        uow.node_boundaries().update(boundary).await?;
        uow.commit().await
    }

    /// Rolls back to `checkpoint_id`. The checkpoint store resolves ties
    /// between sibling checkpoints at the same point by
    /// `(tool_track_ordinal, seq)`, descending (spec §9's rollback
    /// tie-break decision, SPEC_FULL §11).
    ///
    /// This touches only the external checkpoint store. It does not enqueue
    /// an outbox event itself (spec §4.3) — the caller owns the single
    /// atomic UoW that records the restored state plus its audit event
    /// (spec §4.7 Phase 1).
    pub async fn rollback(&self, checkpoint_id: &str) -> Result<ExecutionState> {
        Ok(self.checkpoints.rollback(checkpoint_id).await?)
    }

    /// Forks a new session from `checkpoint_id` without disturbing the
    /// original (spec §4.6's shallow-merge fork semantics live in
    /// `wf_checkpoint::ExecutionState::merged_with`, applied by the caller
    /// before the next checkpoint is saved in the new session).
    ///
    /// Touches only the external checkpoint store, same as [`Self::rollback`]
    /// — no outbox write here. The caller (C9's `fork`) enqueues the single
    /// `EXECUTION_FORKED` audit event in its own atomic unit of work, so this
    /// doesn't also record one and end up with two events for one fork.
    pub async fn create_branch(&self, checkpoint_id: &str) -> Result<i64> {
        Ok(self.checkpoints.create_branch(checkpoint_id).await?)
    }
}
