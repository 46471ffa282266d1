//! The batch execution coordinator (spec §4.6/§4.7, C10).
//!
//! Grounded in `original_source/wtb/application/services/batch_execution_coordinator.py`:
//! every rollback/fork is split into a Phase 1 atomic unit of work (state
//! change + outbox audit event, plus a conditional file-restore intent event
//! in the *same* UoW) and a Phase 2 best-effort step that the outbox
//! processor carries out afterward against the file store, because the
//! checkpoint store and the file store cannot share one transaction with the
//! primary database.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::domain::{CompiledGraph, Execution, OutboxEvent, OutboxEventType};
use crate::error::{CoreError, Result};
use crate::execution_controller::ExecutionController;
use crate::repositories::{CheckpointFileRepository, ExecutionRepository, OutboxRepository};
use crate::uow::UnitOfWorkFactory;
use wf_checkpoint::ExecutionState;

pub struct BatchExecutionCoordinator {
    factory: Arc<dyn UnitOfWorkFactory>,
    controller: Arc<ExecutionController>,
    max_retries: u32,
}

impl BatchExecutionCoordinator {
    pub fn new(factory: Arc<dyn UnitOfWorkFactory>, controller: Arc<ExecutionController>, max_retries: u32) -> Self {
        Self {
            factory,
            controller,
            max_retries,
        }
    }

    /// Phase 1 of spec §4.7: restores checkpoint state through the
    /// controller, then in one single [`crate::uow::UnitOfWork`] records the
    /// execution's restored `current_node_id` and forced `PAUSED` status, an
    /// audit `ROLLBACK_PERFORMED` event, and — if the restored checkpoint
    /// carries a linked file commit — a `ROLLBACK_FILE_RESTORE` event for
    /// Phase 2's best-effort file restore. `graph` is accepted but not
    /// required here (spec §6: optional on plain `rollback`); it is required
    /// on [`Self::rollback_and_run`].
    ///
    /// Forcing `PAUSED` regardless of the execution's prior status is spec
    /// §3's explicit contract ("`rollback` returns PAUSED regardless of
    /// current status if a valid checkpoint is supplied"), matching
    /// `batch_execution_coordinator.py`'s own "Returns: Execution in PAUSED
    /// state with restored checkpoint state." This is a different operation
    /// from `StateAdapter::rollback` (C5), which stays status-silent because
    /// it is a pure pass-through to the checkpoint store — the status change
    /// belongs to whichever caller owns the atomic unit of work, which here
    /// is this coordinator.
    pub async fn rollback(
        &self,
        execution_id: &str,
        checkpoint_id: &str,
        _graph: Option<&CompiledGraph>,
    ) -> Result<ExecutionState> {
        let restored = self.controller.restore_checkpoint_state(checkpoint_id).await?;

        let mut uow = self.factory.begin().await?;
        let mut execution = uow.executions().get_by_id(execution_id).await?;
        execution.current_node_id = restored.current_node_id.clone();
        execution.status = crate::domain::ExecutionStatus::Paused;
        execution.updated_at = chrono::Utc::now();
        uow.executions().update(execution.clone()).await?;

        uow.outbox()
            .add(OutboxEvent::new(
                OutboxEventType::RollbackPerformed,
                "execution",
                execution_id,
                serde_json::json!({"execution_id": execution_id, "checkpoint_id": checkpoint_id}),
                None,
                self.max_retries,
            ))
            .await?;

        let link = uow.checkpoint_files().get_for_checkpoint(checkpoint_id).await?;
        if let Some(link) = link {
            uow.outbox()
                .add(OutboxEvent::new(
                    OutboxEventType::RollbackFileRestore,
                    "checkpoint",
                    checkpoint_id,
                    serde_json::json!({
                        "execution_id": execution_id,
                        "checkpoint_id": checkpoint_id,
                        "file_commit_id": link.file_commit_id,
                    }),
                    None,
                    self.max_retries,
                ))
                .await?;
        }

        uow.commit().await?;
        Ok(restored)
    }

    /// Rolls back (which always leaves the execution `Paused`, see
    /// [`Self::rollback`]), then resumes it. `graph` is required (spec §4.7,
    /// §6): this is a graph-required operation and fails fast with a
    /// validation error, before touching any store, if the caller did not
    /// supply one.
    pub async fn rollback_and_run(&self, execution_id: &str, checkpoint_id: &str, graph: Option<&CompiledGraph>) -> Result<Execution> {
        let graph = graph.ok_or_else(|| CoreError::validation("rollback_and_run requires a compiled graph"))?;
        self.rollback(execution_id, checkpoint_id, Some(graph)).await?;
        let mut uow = self.factory.begin().await?;
        let execution = uow.executions().get_by_id(execution_id).await?;
        uow.commit().await?;
        match execution.status {
            crate::domain::ExecutionStatus::Paused => self.controller.resume(execution_id).await,
            _ => Ok(execution),
        }
    }

    /// Forks `parent_execution_id` from `checkpoint_id` into
    /// `new_execution_id`, fresh and `PENDING` (spec §4.6). `graph` is
    /// accepted but not required here; it is required on
    /// [`Self::fork_and_run`].
    pub async fn fork(
        &self,
        parent_execution_id: &str,
        new_execution_id: &str,
        checkpoint_id: &str,
        overrides: HashMap<String, serde_json::Value>,
        _graph: Option<&CompiledGraph>,
    ) -> Result<Execution> {
        self.controller
            .fork(parent_execution_id, new_execution_id, checkpoint_id, overrides)
            .await
    }

    /// `fork` immediately followed by running the fork; kept distinct from
    /// [`Self::fork`] because a caller that only wants the branch recorded
    /// (without starting it) calls `fork` alone. `graph` is required (spec
    /// §4.7, §6): this is a graph-required operation and fails fast with a
    /// validation error, before touching any store, if the caller did not
    /// supply one.
    pub async fn fork_and_run(
        &self,
        parent_execution_id: &str,
        new_execution_id: &str,
        checkpoint_id: &str,
        graph: Option<&CompiledGraph>,
        overrides: HashMap<String, serde_json::Value>,
    ) -> Result<Execution> {
        let graph = graph.ok_or_else(|| CoreError::validation("fork_and_run requires a compiled graph"))?;
        let forked = self.fork(parent_execution_id, new_execution_id, checkpoint_id, overrides, Some(graph)).await?;
        self.controller.run(&forked.id).await
    }

    /// Rolls back every `(execution_id, checkpoint_id)` pair — sugar over
    /// [`Self::batch_operate`] (spec §4.7). Unless `stop_on_error`, one
    /// failing pair does not stop the rest of the batch, and every outcome
    /// (success or error) is returned in input order.
    pub async fn batch_rollback(
        &self,
        pairs: &[(String, String)],
        graph: Option<&CompiledGraph>,
        stop_on_error: bool,
    ) -> Vec<Result<ExecutionState>> {
        self.batch_operate(pairs.to_vec(), stop_on_error, |(execution_id, checkpoint_id)| async move {
            let outcome = self.rollback(&execution_id, &checkpoint_id, graph).await;
            if let Err(e) = &outcome {
                warn!(execution_id, checkpoint_id, error = %e, "batch rollback entry failed");
            }
            outcome
        })
        .await
    }

    /// Forks every `(parent_execution_id, new_execution_id, checkpoint_id)`
    /// triple — sugar over [`Self::batch_operate`] (spec §4.7).
    /// `new_execution_id`s must be unique up front — a validation failure
    /// here is fail-fast and aborts the whole batch before any fork runs,
    /// since colliding ids would otherwise silently overwrite a
    /// just-created fork.
    pub async fn batch_fork(
        &self,
        triples: &[(String, String, String)],
        overrides: HashMap<String, serde_json::Value>,
        graph: Option<&CompiledGraph>,
        stop_on_error: bool,
    ) -> Result<Vec<Result<Execution>>> {
        let mut seen = std::collections::HashSet::new();
        for (_, new_id, _) in triples {
            if !seen.insert(new_id.clone()) {
                return Err(CoreError::validation(format!("duplicate new_execution_id {new_id} in batch fork")));
            }
        }

        Ok(self
            .batch_operate(triples.to_vec(), stop_on_error, |(parent_id, new_id, checkpoint_id)| async move {
                let outcome = self
                    .fork(&parent_id, &new_id, &checkpoint_id, overrides.clone(), graph)
                    .await;
                if let Err(e) = &outcome {
                    warn!(parent_id, new_id, checkpoint_id, error = %e, "batch fork entry failed");
                }
                outcome
            })
            .await)
    }

    /// Runs an arbitrary per-item operation across `items`, collecting every
    /// outcome in input order (spec §4.7's `batch_operate`). When
    /// `stop_on_error` is false (the default per spec §6), a failing item is
    /// recorded in its slot and the rest of the batch still runs. When true,
    /// the first failure stops the batch; remaining items are not attempted
    /// and are absent from the result (same truncated-but-ordered contract
    /// `batch_rollback`/`batch_fork` build on).
    pub async fn batch_operate<T, F, Fut, R>(&self, items: Vec<T>, stop_on_error: bool, op: F) -> Vec<Result<R>>
    where
        F: Fn(T) -> Fut,
        Fut: std::future::Future<Output = Result<R>>,
    {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let outcome = op(item).await;
            let failed = outcome.is_err();
            results.push(outcome);
            if failed && stop_on_error {
                break;
            }
        }
        results
    }
}
