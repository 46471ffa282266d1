//! Hash-map backed unit of work, for tests and local development.
//!
//! Writes land in a private snapshot (`staged`) taken at `begin()` and are
//! only folded back into the shared store on `commit()` — so a reader going
//! through a second, concurrently-opened unit of work never observes an
//! uncommitted write (spec §4.1). Only the keys this unit of work actually
//! touched (`dirty`) are merged back; an untouched row from `staged` never
//! clobbers a concurrent writer's committed update to that same row (spec
//! P1 is per-row, not "whoever commits last wins the whole database").
//!
//! Auto-increment id counters for `outbox`/`node_boundaries` live on
//! [`InMemoryDatabase`] itself, outside any UoW's snapshot, so id assignment
//! at `add()` time is globally unique regardless of which snapshot a given
//! UoW is staged against.
//!
//! `Execution` rows additionally carry optimistic-concurrency versions
//! (spec §4.1): the version seen at `begin()` is compared against the live
//! row at `commit()` time, and a mismatch fails the whole commit with
//! `CoreError::StaleState` before any table is touched.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::{
    Blob, CheckpointFileLink, Execution, FileCommit, NodeBoundary, NodeVariant, OutboxEvent,
    OutboxStatus, Workflow,
};
use crate::error::{CoreError, Result};
use crate::repositories::{
    BlobRepository, CheckpointFileRepository, ExecutionRepository, FileCommitRepository,
    NodeBoundaryRepository, OutboxRepository, VariantRepository, WorkflowRepository,
};

use super::traits::{UnitOfWork, UnitOfWorkFactory};

#[derive(Clone, Default)]
struct Tables {
    executions: HashMap<String, Execution>,
    workflows: HashMap<String, Workflow>,
    variants: HashMap<String, NodeVariant>,
    outbox: HashMap<i64, OutboxEvent>,
    checkpoint_files: HashMap<String, CheckpointFileLink>,
    file_commits: HashMap<String, FileCommit>,
    blobs: HashMap<String, Blob>,
    node_boundaries: HashMap<i64, NodeBoundary>,
}

/// Which keys a single unit of work actually wrote (inserted, updated, or
/// deleted). Only these are reconciled into the shared tables at commit.
#[derive(Default)]
struct Dirty {
    executions: HashSet<String>,
    workflows: HashSet<String>,
    variants: HashSet<String>,
    outbox: HashSet<i64>,
    checkpoint_files: HashSet<String>,
    file_commits: HashSet<String>,
    blobs: HashSet<String>,
    node_boundaries: HashSet<i64>,
}

/// Merges every key in `dirty` from `staged` into `shared`: present in
/// `staged` means insert/update, absent means the key was deleted in this
/// unit of work.
fn merge_dirty<K, V>(shared: &mut HashMap<K, V>, staged: &HashMap<K, V>, dirty: &HashSet<K>)
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    for key in dirty {
        match staged.get(key) {
            Some(value) => {
                shared.insert(key.clone(), value.clone());
            }
            None => {
                shared.remove(key);
            }
        }
    }
}

/// The committed state shared by every unit of work opened against it.
#[derive(Clone)]
pub struct InMemoryDatabase {
    tables: Arc<RwLock<Tables>>,
    outbox_next_id: Arc<AtomicI64>,
    node_boundary_next_id: Arc<AtomicI64>,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            outbox_next_id: Arc::new(AtomicI64::new(0)),
            node_boundary_next_id: Arc::new(AtomicI64::new(0)),
        }
    }
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct InMemoryUnitOfWorkFactory {
    db: InMemoryDatabase,
}

impl InMemoryUnitOfWorkFactory {
    pub fn new(db: InMemoryDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UnitOfWorkFactory for InMemoryUnitOfWorkFactory {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let staged = self.db.tables.read().clone();
        let execution_baseline_versions = staged
            .executions
            .iter()
            .map(|(id, e)| (id.clone(), e.version))
            .collect();
        Ok(Box::new(InMemoryUnitOfWork {
            shared: self.db.tables.clone(),
            outbox_next_id: self.db.outbox_next_id.clone(),
            node_boundary_next_id: self.db.node_boundary_next_id.clone(),
            staged,
            dirty: Dirty::default(),
            execution_baseline_versions,
        }))
    }
}

pub struct InMemoryUnitOfWork {
    shared: Arc<RwLock<Tables>>,
    outbox_next_id: Arc<AtomicI64>,
    node_boundary_next_id: Arc<AtomicI64>,
    staged: Tables,
    dirty: Dirty,
    execution_baseline_versions: HashMap<String, i64>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<()> {
        let mut shared = self.shared.write();

        for id in &self.dirty.executions {
            let Some(baseline) = self.execution_baseline_versions.get(id) else {
                continue; // row created in this UoW, nothing to conflict with
            };
            let live = shared.executions.get(id).map(|e| e.version).unwrap_or(0);
            if live != *baseline {
                return Err(CoreError::StaleState(format!(
                    "execution {id} was updated concurrently (expected version {baseline}, found {live})"
                )));
            }
        }

        merge_dirty(&mut shared.executions, &self.staged.executions, &self.dirty.executions);
        merge_dirty(&mut shared.workflows, &self.staged.workflows, &self.dirty.workflows);
        merge_dirty(&mut shared.variants, &self.staged.variants, &self.dirty.variants);
        merge_dirty(&mut shared.outbox, &self.staged.outbox, &self.dirty.outbox);
        merge_dirty(
            &mut shared.checkpoint_files,
            &self.staged.checkpoint_files,
            &self.dirty.checkpoint_files,
        );
        merge_dirty(&mut shared.file_commits, &self.staged.file_commits, &self.dirty.file_commits);
        merge_dirty(&mut shared.blobs, &self.staged.blobs, &self.dirty.blobs);
        merge_dirty(
            &mut shared.node_boundaries,
            &self.staged.node_boundaries,
            &self.dirty.node_boundaries,
        );
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    fn executions(&mut self) -> &mut dyn ExecutionRepository {
        self
    }
    fn workflows(&mut self) -> &mut dyn WorkflowRepository {
        self
    }
    fn variants(&mut self) -> &mut dyn VariantRepository {
        self
    }
    fn outbox(&mut self) -> &mut dyn OutboxRepository {
        self
    }
    fn checkpoint_files(&mut self) -> &mut dyn CheckpointFileRepository {
        self
    }
    fn file_commits(&mut self) -> &mut dyn FileCommitRepository {
        self
    }
    fn blobs(&mut self) -> &mut dyn BlobRepository {
        self
    }
    fn node_boundaries(&mut self) -> &mut dyn NodeBoundaryRepository {
        self
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryUnitOfWork {
    async fn add(&mut self, execution: Execution) -> Result<()> {
        self.dirty.executions.insert(execution.id.clone());
        self.staged.executions.insert(execution.id.clone(), execution);
        Ok(())
    }

    async fn get_by_id(&mut self, id: &str) -> Result<Execution> {
        self.staged
            .executions
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("execution {id}")))
    }

    async fn update(&mut self, mut execution: Execution) -> Result<()> {
        execution.version += 1;
        self.dirty.executions.insert(execution.id.clone());
        self.staged.executions.insert(execution.id.clone(), execution);
        Ok(())
    }

    async fn list_by_workflow(&mut self, workflow_id: &str) -> Result<Vec<Execution>> {
        Ok(self
            .staged
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn list_running(&mut self) -> Result<Vec<Execution>> {
        Ok(self
            .staged
            .executions
            .values()
            .filter(|e| e.status == crate::domain::ExecutionStatus::Running)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryUnitOfWork {
    async fn add(&mut self, workflow: Workflow) -> Result<()> {
        self.dirty.workflows.insert(workflow.id.clone());
        self.staged.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn get_by_id(&mut self, id: &str) -> Result<Workflow> {
        self.staged
            .workflows
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("workflow {id}")))
    }

    async fn update(&mut self, workflow: Workflow) -> Result<()> {
        self.dirty.workflows.insert(workflow.id.clone());
        self.staged.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn list(&mut self) -> Result<Vec<Workflow>> {
        Ok(self.staged.workflows.values().cloned().collect())
    }
}

#[async_trait]
impl VariantRepository for InMemoryUnitOfWork {
    async fn add(&mut self, variant: NodeVariant) -> Result<()> {
        self.dirty.variants.insert(variant.id.clone());
        self.staged.variants.insert(variant.id.clone(), variant);
        Ok(())
    }

    async fn get_by_id(&mut self, id: &str) -> Result<NodeVariant> {
        self.staged
            .variants
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("node variant {id}")))
    }

    async fn update(&mut self, variant: NodeVariant) -> Result<()> {
        self.dirty.variants.insert(variant.id.clone());
        self.staged.variants.insert(variant.id.clone(), variant);
        Ok(())
    }

    async fn list_for_node(&mut self, workflow_id: &str, node_id: &str) -> Result<Vec<NodeVariant>> {
        Ok(self
            .staged
            .variants
            .values()
            .filter(|v| v.workflow_id == workflow_id && v.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn get_active(&mut self, workflow_id: &str, node_id: &str) -> Result<Option<NodeVariant>> {
        Ok(self
            .staged
            .variants
            .values()
            .find(|v| v.workflow_id == workflow_id && v.node_id == node_id && v.is_active)
            .cloned())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryUnitOfWork {
    async fn add(&mut self, mut event: OutboxEvent) -> Result<OutboxEvent> {
        if let Some(key) = event.idempotency_key.as_deref() {
            if let Some(existing) = self
                .staged
                .outbox
                .values()
                .find(|e| e.idempotency_key.as_deref() == Some(key))
                .cloned()
            {
                return Err(CoreError::Conflict {
                    entity: "outbox_event".to_string(),
                    reason: format!("idempotency key {key} already recorded"),
                    existing: Some(Box::new(existing)),
                });
            }
        }
        let id = self.outbox_next_id.fetch_add(1, Ordering::SeqCst) + 1;
        event.id = Some(id);
        self.dirty.outbox.insert(id);
        self.staged.outbox.insert(id, event.clone());
        Ok(event)
    }

    async fn get_by_id(&mut self, id: i64) -> Result<OutboxEvent> {
        self.staged
            .outbox
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("outbox event {id}")))
    }

    async fn find_by_idempotency_key(&mut self, key: &str) -> Result<Option<OutboxEvent>> {
        Ok(self
            .staged
            .outbox
            .values()
            .find(|e| e.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn claim_pending(&mut self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let mut candidates: Vec<OutboxEvent> = self
            .staged
            .outbox
            .values()
            .filter(|e| e.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        candidates.sort_by_key(|e| e.created_at);
        candidates.truncate(limit);
        for ev in &mut candidates {
            ev.mark_processing();
            if let Some(id) = ev.id {
                self.dirty.outbox.insert(id);
                self.staged.outbox.insert(id, ev.clone());
            }
        }
        Ok(candidates)
    }

    async fn get_failed_for_retry(&mut self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let mut candidates: Vec<OutboxEvent> = self
            .staged
            .outbox
            .values()
            .filter(|e| e.can_retry())
            .cloned()
            .collect();
        candidates.sort_by_key(|e| e.created_at);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn update(&mut self, event: OutboxEvent) -> Result<()> {
        let id = event
            .id
            .ok_or_else(|| CoreError::validation("outbox event missing id on update"))?;
        self.dirty.outbox.insert(id);
        self.staged.outbox.insert(id, event);
        Ok(())
    }

    async fn delete_processed(&mut self, before: DateTime<Utc>, limit: usize) -> Result<u64> {
        let mut ids: Vec<i64> = self
            .staged
            .outbox
            .values()
            .filter(|e| e.status == OutboxStatus::Processed)
            .filter(|e| e.processed_at.map(|t| t < before).unwrap_or(false))
            .filter_map(|e| e.id)
            .collect();
        ids.truncate(limit);
        for id in &ids {
            self.staged.outbox.remove(id);
            self.dirty.outbox.insert(*id);
        }
        Ok(ids.len() as u64)
    }

    async fn find_stuck_processing(&mut self, stuck_after: DateTime<Utc>) -> Result<Vec<OutboxEvent>> {
        Ok(self
            .staged
            .outbox
            .values()
            .filter(|e| {
                e.status == OutboxStatus::Processing
                    && e.claimed_at.map(|t| t < stuck_after).unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CheckpointFileRepository for InMemoryUnitOfWork {
    async fn add(&mut self, link: CheckpointFileLink) -> Result<()> {
        self.dirty.checkpoint_files.insert(link.checkpoint_id.clone());
        self.staged
            .checkpoint_files
            .insert(link.checkpoint_id.clone(), link);
        Ok(())
    }

    async fn get_for_checkpoint(&mut self, checkpoint_id: &str) -> Result<Option<CheckpointFileLink>> {
        Ok(self.staged.checkpoint_files.get(checkpoint_id).cloned())
    }

    async fn list_all(&mut self) -> Result<Vec<CheckpointFileLink>> {
        Ok(self.staged.checkpoint_files.values().cloned().collect())
    }

    async fn delete_for_checkpoint(&mut self, checkpoint_id: &str) -> Result<()> {
        self.staged.checkpoint_files.remove(checkpoint_id);
        self.dirty.checkpoint_files.insert(checkpoint_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl FileCommitRepository for InMemoryUnitOfWork {
    async fn add(&mut self, commit: FileCommit) -> Result<()> {
        self.dirty.file_commits.insert(commit.id.clone());
        self.staged.file_commits.insert(commit.id.clone(), commit);
        Ok(())
    }

    async fn get_by_id(&mut self, id: &str) -> Result<FileCommit> {
        self.staged
            .file_commits
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("file commit {id}")))
    }

    async fn list_all(&mut self) -> Result<Vec<FileCommit>> {
        Ok(self.staged.file_commits.values().cloned().collect())
    }
}

#[async_trait]
impl BlobRepository for InMemoryUnitOfWork {
    async fn put_if_absent(&mut self, blob: Blob) -> Result<()> {
        if !self.staged.blobs.contains_key(&blob.hash) {
            self.dirty.blobs.insert(blob.hash.clone());
            self.staged.blobs.insert(blob.hash.clone(), blob);
        }
        Ok(())
    }

    async fn get_by_hash(&mut self, hash: &str) -> Result<Option<Blob>> {
        Ok(self.staged.blobs.get(hash).cloned())
    }

    async fn exists(&mut self, hash: &str) -> Result<bool> {
        Ok(self.staged.blobs.contains_key(hash))
    }
}

#[async_trait]
impl NodeBoundaryRepository for InMemoryUnitOfWork {
    async fn add(&mut self, mut boundary: NodeBoundary) -> Result<NodeBoundary> {
        let id = self.node_boundary_next_id.fetch_add(1, Ordering::SeqCst) + 1;
        boundary.id = Some(id);
        self.dirty.node_boundaries.insert(id);
        self.staged.node_boundaries.insert(id, boundary.clone());
        Ok(boundary)
    }

    async fn update(&mut self, boundary: NodeBoundary) -> Result<()> {
        let id = boundary
            .id
            .ok_or_else(|| CoreError::validation("node boundary missing id on update"))?;
        self.dirty.node_boundaries.insert(id);
        self.staged.node_boundaries.insert(id, boundary);
        Ok(())
    }

    async fn get_open_for_session(&mut self, session_id: i64) -> Result<Option<NodeBoundary>> {
        Ok(self
            .staged
            .node_boundaries
            .values()
            .find(|b| b.session_id == session_id && b.status == crate::domain::BoundaryStatus::Started)
            .cloned())
    }

    async fn list_for_execution(&mut self, execution_id: &str) -> Result<Vec<NodeBoundary>> {
        Ok(self
            .staged
            .node_boundaries
            .values()
            .filter(|b| b.execution_id == execution_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let db = InMemoryDatabase::new();
        let factory = InMemoryUnitOfWorkFactory::new(db.clone());

        let mut uow = factory.begin().await.unwrap();
        uow.executions()
            .add(Execution::new("exec-1", "wf-1"))
            .await
            .unwrap();

        let mut reader = factory.begin().await.unwrap();
        assert!(reader.executions().get_by_id("exec-1").await.is_err());

        uow.commit().await.unwrap();

        let mut reader2 = factory.begin().await.unwrap();
        assert!(reader2.executions().get_by_id("exec-1").await.is_ok());
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let db = InMemoryDatabase::new();
        let factory = InMemoryUnitOfWorkFactory::new(db.clone());

        let mut uow = factory.begin().await.unwrap();
        uow.executions()
            .add(Execution::new("exec-2", "wf-1"))
            .await
            .unwrap();
        uow.rollback().await.unwrap();

        let mut reader = factory.begin().await.unwrap();
        assert!(reader.executions().get_by_id("exec-2").await.is_err());
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_surfaces_existing_event() {
        let db = InMemoryDatabase::new();
        let factory = InMemoryUnitOfWorkFactory::new(db);
        let mut uow = factory.begin().await.unwrap();

        let first = crate::domain::OutboxEvent::new(
            crate::domain::OutboxEventType::CheckpointSaved,
            "execution",
            "exec-1",
            serde_json::json!({}),
            Some("idem-1".to_string()),
            3,
        );
        uow.outbox().add(first).await.unwrap();

        let second = crate::domain::OutboxEvent::new(
            crate::domain::OutboxEventType::CheckpointSaved,
            "execution",
            "exec-1",
            serde_json::json!({}),
            Some("idem-1".to_string()),
            3,
        );
        let err = uow.outbox().add(second).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn concurrent_updates_to_the_same_execution_surface_stale_state() {
        let db = InMemoryDatabase::new();
        let factory = InMemoryUnitOfWorkFactory::new(db);

        let mut setup = factory.begin().await.unwrap();
        setup.executions().add(Execution::new("exec-3", "wf-1")).await.unwrap();
        setup.commit().await.unwrap();

        let mut uow_a = factory.begin().await.unwrap();
        let mut uow_b = factory.begin().await.unwrap();

        let exec_a = uow_a.executions().get_by_id("exec-3").await.unwrap();
        uow_a.executions().update(exec_a).await.unwrap();
        uow_a.commit().await.unwrap();

        let exec_b = uow_b.executions().get_by_id("exec-3").await.unwrap();
        uow_b.executions().update(exec_b).await.unwrap();
        let err = uow_b.commit().await.unwrap_err();
        assert!(matches!(err, CoreError::StaleState(_)));

        let mut reader = factory.begin().await.unwrap();
        let final_exec = reader.executions().get_by_id("exec-3").await.unwrap();
        assert_eq!(final_exec.version, 1);
    }

    #[tokio::test]
    async fn two_uows_committing_different_rows_both_survive() {
        let db = InMemoryDatabase::new();
        let factory = InMemoryUnitOfWorkFactory::new(db);

        let mut seed = factory.begin().await.unwrap();
        seed.executions().add(Execution::new("exec-4", "wf-1")).await.unwrap();
        seed.executions().add(Execution::new("exec-5", "wf-1")).await.unwrap();
        seed.commit().await.unwrap();

        let mut uow_a = factory.begin().await.unwrap();
        let mut uow_b = factory.begin().await.unwrap();

        let exec_a = uow_a.executions().get_by_id("exec-4").await.unwrap();
        uow_a.executions().update(exec_a).await.unwrap();

        let exec_b = uow_b.executions().get_by_id("exec-5").await.unwrap();
        uow_b.executions().update(exec_b).await.unwrap();

        uow_a.commit().await.unwrap();
        uow_b.commit().await.unwrap();

        let mut reader = factory.begin().await.unwrap();
        assert_eq!(reader.executions().get_by_id("exec-4").await.unwrap().version, 1);
        assert_eq!(reader.executions().get_by_id("exec-5").await.unwrap().version, 1);
    }
}
