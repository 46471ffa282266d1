//! The execution controller (spec §4.7ish / C9): owns the execution state
//! machine and the outbox events that accompany each transition.
//!
//! Grounded in `orca`'s `orchestrator::execution::workflow_engine` for the
//! shape of an engine driving a state-carrying record through named
//! transitions, re-pointed at this system's `ExecutionStatus` (spec §3).

use std::sync::Arc;

use tracing::info;

use crate::domain::{Execution, ExecutionStatus, OutboxEvent, OutboxEventType};
use crate::error::{CoreError, Result};
use crate::repositories::{ExecutionRepository, OutboxRepository};
use crate::state_adapter::StateAdapter;
use crate::uow::UnitOfWorkFactory;
use wf_checkpoint::{ExecutionState, SaveTrigger};

pub struct ExecutionController {
    factory: Arc<dyn UnitOfWorkFactory>,
    state_adapter: Arc<StateAdapter>,
    max_retries: u32,
}

impl ExecutionController {
    pub fn new(factory: Arc<dyn UnitOfWorkFactory>, state_adapter: Arc<StateAdapter>, max_retries: u32) -> Self {
        Self {
            factory,
            state_adapter,
            max_retries,
        }
    }

    fn transition_or_conflict(execution: &Execution, next: ExecutionStatus) -> Result<()> {
        if !execution.status.can_transition_to(next) {
            return Err(CoreError::StaleState(format!(
                "execution {} cannot move from {:?} to {:?}",
                execution.id, execution.status, next
            )));
        }
        Ok(())
    }

    pub async fn run(&self, execution_id: &str) -> Result<Execution> {
        let mut uow = self.factory.begin().await?;
        let mut execution = uow.executions().get_by_id(execution_id).await?;
        Self::transition_or_conflict(&execution, ExecutionStatus::Running)?;

        let session_id = self
            .state_adapter
            .initialize_session(execution_id, ExecutionState::empty())
            .await?;

        execution.status = ExecutionStatus::Running;
        execution.session_id = Some(session_id);
        execution.updated_at = chrono::Utc::now();
        uow.executions().update(execution.clone()).await?;
        uow.outbox()
            .add(OutboxEvent::new(
                OutboxEventType::StateModified,
                "execution",
                execution_id,
                serde_json::json!({"status": "RUNNING"}),
                None,
                self.max_retries,
            ))
            .await?;
        uow.commit().await?;
        info!(execution_id, "execution started");
        Ok(execution)
    }

    pub async fn pause(&self, execution_id: &str) -> Result<Execution> {
        self.transition_with_event(execution_id, ExecutionStatus::Paused, OutboxEventType::ExecutionPaused, None)
            .await
            .map(|(execution, _)| execution)
    }

    /// As [`Self::pause`], but deduplicated on `idempotency_key`: a second
    /// call with the same key against the same execution returns the first
    /// call's outcome (same outbox event id) instead of erroring on a
    /// transition that already happened (spec §4.2, SPEC_FULL §11).
    pub async fn pause_idempotent(&self, execution_id: &str, idempotency_key: &str) -> Result<(Execution, i64)> {
        self.transition_with_event(
            execution_id,
            ExecutionStatus::Paused,
            OutboxEventType::ExecutionPaused,
            Some(idempotency_key.to_string()),
        )
        .await
    }

    pub async fn resume(&self, execution_id: &str) -> Result<Execution> {
        self.transition_with_event(execution_id, ExecutionStatus::Running, OutboxEventType::ExecutionResumed, None)
            .await
            .map(|(execution, _)| execution)
    }

    pub async fn complete(&self, execution_id: &str) -> Result<Execution> {
        self.transition_with_event(execution_id, ExecutionStatus::Completed, OutboxEventType::StateModified, None)
            .await
            .map(|(execution, _)| execution)
    }

    pub async fn cancel(&self, execution_id: &str) -> Result<Execution> {
        self.transition_with_event(execution_id, ExecutionStatus::Cancelled, OutboxEventType::ExecutionStopped, None)
            .await
            .map(|(execution, _)| execution)
    }

    pub async fn fail(&self, execution_id: &str, error_message: impl Into<String>) -> Result<Execution> {
        let mut uow = self.factory.begin().await?;
        let mut execution = uow.executions().get_by_id(execution_id).await?;
        Self::transition_or_conflict(&execution, ExecutionStatus::Failed)?;
        execution.status = ExecutionStatus::Failed;
        execution.error_message = Some(error_message.into());
        execution.updated_at = chrono::Utc::now();
        uow.executions().update(execution.clone()).await?;
        uow.outbox()
            .add(OutboxEvent::new(
                OutboxEventType::StateModified,
                "execution",
                execution_id,
                serde_json::json!({"status": "FAILED"}),
                None,
                self.max_retries,
            ))
            .await?;
        uow.commit().await?;
        Ok(execution)
    }

    async fn transition_with_event(
        &self,
        execution_id: &str,
        next: ExecutionStatus,
        event_type: OutboxEventType,
        idempotency_key: Option<String>,
    ) -> Result<(Execution, i64)> {
        let mut uow = self.factory.begin().await?;

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = uow.outbox().find_by_idempotency_key(key).await? {
                let execution = uow.executions().get_by_id(execution_id).await?;
                uow.commit().await?;
                return Ok((execution, existing.id.expect("persisted event has an id")));
            }
        }

        let mut execution = uow.executions().get_by_id(execution_id).await?;
        Self::transition_or_conflict(&execution, next)?;
        execution.status = next;
        execution.updated_at = chrono::Utc::now();
        uow.executions().update(execution.clone()).await?;
        let event = uow
            .outbox()
            .add(OutboxEvent::new(
                event_type,
                "execution",
                execution_id,
                serde_json::json!({"status": format!("{:?}", next).to_uppercase()}),
                idempotency_key,
                self.max_retries,
            ))
            .await?;
        uow.commit().await?;
        Ok((execution, event.id.expect("persisted event has an id")))
    }

    /// Restores checkpoint state through the state adapter only — no UoW,
    /// no outbox write. The caller (C10's batch coordinator) owns the single
    /// atomic unit of work that records the execution update plus the audit
    /// event alongside this restored state (spec §4.7 Phase 1).
    pub async fn restore_checkpoint_state(&self, checkpoint_id: &str) -> Result<ExecutionState> {
        self.state_adapter.rollback(checkpoint_id).await
    }

    /// Forks a new execution from `checkpoint_id`, copying the parent's
    /// workflow id and merging any `overrides` into the forked state (spec
    /// §4.6's shallow merge, `ExecutionState::merged_with`). The fork starts
    /// `PENDING`, same as any other freshly created execution (spec §3/§4.6);
    /// it has not been run yet.
    pub async fn fork(
        &self,
        parent_execution_id: &str,
        new_execution_id: &str,
        checkpoint_id: &str,
        overrides: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<Execution> {
        let mut uow = self.factory.begin().await?;
        let parent = uow.executions().get_by_id(parent_execution_id).await?;

        let source_checkpoint = self.state_adapter.load_checkpoint(checkpoint_id).await?;
        let merged_state = source_checkpoint.state.merged_with(&overrides);

        let new_session_id = self.state_adapter.create_branch(checkpoint_id).await?;
        let merged_checkpoint = self
            .state_adapter
            .save_checkpoint(
                new_session_id,
                merged_state.clone(),
                source_checkpoint.node_id.clone(),
                SaveTrigger::UserRequest,
                Some(format!("fork of {checkpoint_id}")),
            )
            .await?;

        let mut forked = Execution::new(new_execution_id, parent.workflow_id.clone());
        forked.status = ExecutionStatus::Pending;
        forked.session_id = Some(new_session_id);
        forked.current_node_id = merged_checkpoint.state.current_node_id.clone();
        uow.executions().add(forked.clone()).await?;
        uow.outbox()
            .add(OutboxEvent::new(
                OutboxEventType::ExecutionForked,
                "execution",
                new_execution_id,
                serde_json::json!({"parent_execution_id": parent_execution_id, "checkpoint_id": checkpoint_id, "overrides": overrides}),
                None,
                self.max_retries,
            ))
            .await?;
        uow.commit().await?;
        Ok(forked)
    }
}
