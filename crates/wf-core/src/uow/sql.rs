//! SQLite-backed unit of work, mirroring `orca`'s
//! `repositories/task_repository.rs` query style: `sqlx::query(...)` with
//! positional binds, mapped into domain structs by hand rather than relying
//! on `FromRow` for columns that need JSON or enum decoding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::domain::{
    Blob, BoundaryStatus, CheckpointFileLink, Execution, ExecutionStatus, FileCommit, FileEntry,
    NodeBoundary, NodeVariant, OutboxEvent, OutboxEventType, OutboxStatus, Workflow,
};
use crate::error::{CoreError, Result};
use crate::repositories::{
    BlobRepository, CheckpointFileRepository, ExecutionRepository, FileCommitRepository,
    NodeBoundaryRepository, OutboxRepository, VariantRepository, WorkflowRepository,
};

use super::traits::{UnitOfWork, UnitOfWorkFactory};

fn enum_to_col<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

fn col_to_enum<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{raw}\""))?)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| CoreError::CorruptState(format!("bad timestamp {raw}: {e}")))?
        .with_timezone(&Utc))
}

pub struct SqlUnitOfWorkFactory {
    pool: SqlitePool,
}

impl SqlUnitOfWorkFactory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitOfWorkFactory for SqlUnitOfWorkFactory {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqlUnitOfWork { tx: Some(tx) }))
    }
}

pub struct SqlUnitOfWork {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqlUnitOfWork {
    fn tx(&mut self) -> &mut Transaction<'static, Sqlite> {
        self.tx.as_mut().expect("unit of work used after commit/rollback")
    }
}

#[async_trait]
impl UnitOfWork for SqlUnitOfWork {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().expect("commit called twice");
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().expect("rollback called twice");
        tx.rollback().await?;
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

fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> Result<Execution> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Execution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        status: col_to_enum::<ExecutionStatus>(&status)?,
        session_id: row.try_get("session_id")?,
        current_node_id: row.try_get("current_node_id")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        error_message: row.try_get("error_message")?,
        version: row.try_get("version")?,
    })
}

#[async_trait]
impl ExecutionRepository for SqlUnitOfWork {
    async fn add(&mut self, execution: Execution) -> Result<()> {
        let status = enum_to_col(&execution.status)?;
        sqlx::query(
            "INSERT INTO executions (id, workflow_id, status, session_id, current_node_id, created_at, updated_at, error_message, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(status)
        .bind(execution.session_id)
        .bind(&execution.current_node_id)
        .bind(execution.created_at.to_rfc3339())
        .bind(execution.updated_at.to_rfc3339())
        .bind(&execution.error_message)
        .bind(execution.version)
        .execute(&mut **self.tx())
        .await?;
        Ok(())
    }

    async fn get_by_id(&mut self, id: &str) -> Result<Execution> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **self.tx())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("execution {id}")))?;
        row_to_execution(&row)
    }

    async fn update(&mut self, execution: Execution) -> Result<()> {
        let status = enum_to_col(&execution.status)?;
        let result = sqlx::query(
            "UPDATE executions SET status = ?, session_id = ?, current_node_id = ?, updated_at = ?, error_message = ?, version = version + 1
             WHERE id = ? AND version = ?",
        )
        .bind(status)
        .bind(execution.session_id)
        .bind(&execution.current_node_id)
        .bind(execution.updated_at.to_rfc3339())
        .bind(&execution.error_message)
        .bind(&execution.id)
        .bind(execution.version)
        .execute(&mut **self.tx())
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::StaleState(format!(
                "execution {} was updated concurrently (expected version {})",
                execution.id, execution.version
            )));
        }
        Ok(())
    }

    async fn list_by_workflow(&mut self, workflow_id: &str) -> Result<Vec<Execution>> {
        let rows = sqlx::query("SELECT * FROM executions WHERE workflow_id = ? ORDER BY created_at")
            .bind(workflow_id)
            .fetch_all(&mut **self.tx())
            .await?;
        rows.iter().map(row_to_execution).collect()
    }

    async fn list_running(&mut self) -> Result<Vec<Execution>> {
        let rows = sqlx::query("SELECT * FROM executions WHERE status = 'RUNNING'")
            .fetch_all(&mut **self.tx())
            .await?;
        rows.iter().map(row_to_execution).collect()
    }
}

fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow> {
    let definition: String = row.try_get("definition")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Workflow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        definition: serde_json::from_str(&definition)?,
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl WorkflowRepository for SqlUnitOfWork {
    async fn add(&mut self, workflow: Workflow) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflows (id, name, version, definition, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.version)
        .bind(serde_json::to_string(&workflow.definition)?)
        .bind(workflow.created_at.to_rfc3339())
        .execute(&mut **self.tx())
        .await?;
        Ok(())
    }

    async fn get_by_id(&mut self, id: &str) -> Result<Workflow> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **self.tx())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("workflow {id}")))?;
        row_to_workflow(&row)
    }

    async fn update(&mut self, workflow: Workflow) -> Result<()> {
        sqlx::query("UPDATE workflows SET name = ?, version = ?, definition = ? WHERE id = ?")
            .bind(&workflow.name)
            .bind(&workflow.version)
            .bind(serde_json::to_string(&workflow.definition)?)
            .bind(&workflow.id)
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn list(&mut self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query("SELECT * FROM workflows ORDER BY created_at")
            .fetch_all(&mut **self.tx())
            .await?;
        rows.iter().map(row_to_workflow).collect()
    }
}

fn row_to_variant(row: &sqlx::sqlite::SqliteRow) -> Result<NodeVariant> {
    let content: String = row.try_get("content")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(NodeVariant {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        node_id: row.try_get("node_id")?,
        label: row.try_get("label")?,
        content: serde_json::from_str(&content)?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl VariantRepository for SqlUnitOfWork {
    async fn add(&mut self, variant: NodeVariant) -> Result<()> {
        sqlx::query(
            "INSERT INTO node_variants (id, workflow_id, node_id, label, content, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&variant.id)
        .bind(&variant.workflow_id)
        .bind(&variant.node_id)
        .bind(&variant.label)
        .bind(serde_json::to_string(&variant.content)?)
        .bind(variant.is_active as i64)
        .bind(variant.created_at.to_rfc3339())
        .execute(&mut **self.tx())
        .await?;
        Ok(())
    }

    async fn get_by_id(&mut self, id: &str) -> Result<NodeVariant> {
        let row = sqlx::query("SELECT * FROM node_variants WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **self.tx())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("node variant {id}")))?;
        row_to_variant(&row)
    }

    async fn update(&mut self, variant: NodeVariant) -> Result<()> {
        sqlx::query("UPDATE node_variants SET label = ?, content = ?, is_active = ? WHERE id = ?")
            .bind(&variant.label)
            .bind(serde_json::to_string(&variant.content)?)
            .bind(variant.is_active as i64)
            .bind(&variant.id)
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn list_for_node(&mut self, workflow_id: &str, node_id: &str) -> Result<Vec<NodeVariant>> {
        let rows = sqlx::query("SELECT * FROM node_variants WHERE workflow_id = ? AND node_id = ?")
            .bind(workflow_id)
            .bind(node_id)
            .fetch_all(&mut **self.tx())
            .await?;
        rows.iter().map(row_to_variant).collect()
    }

    async fn get_active(&mut self, workflow_id: &str, node_id: &str) -> Result<Option<NodeVariant>> {
        let row = sqlx::query(
            "SELECT * FROM node_variants WHERE workflow_id = ? AND node_id = ? AND is_active = 1",
        )
        .bind(workflow_id)
        .bind(node_id)
        .fetch_optional(&mut **self.tx())
        .await?;
        row.as_ref().map(row_to_variant).transpose()
    }
}

fn row_to_outbox_event(row: &sqlx::sqlite::SqliteRow) -> Result<OutboxEvent> {
    let event_id: String = row.try_get("event_id")?;
    let event_type: String = row.try_get("event_type")?;
    let status: String = row.try_get("status")?;
    let payload: String = row.try_get("payload")?;
    let created_at: String = row.try_get("created_at")?;
    let claimed_at: Option<String> = row.try_get("claimed_at")?;
    let processed_at: Option<String> = row.try_get("processed_at")?;
    Ok(OutboxEvent {
        id: row.try_get("id")?,
        event_id: event_id
            .parse()
            .map_err(|e| CoreError::CorruptState(format!("bad event_id {event_id}: {e}")))?,
        event_type: col_to_enum::<OutboxEventType>(&event_type)?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        payload: serde_json::from_str(&payload)?,
        idempotency_key: row.try_get("idempotency_key")?,
        status: col_to_enum::<OutboxStatus>(&status)?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        created_at: parse_ts(&created_at)?,
        claimed_at: claimed_at.map(|s| parse_ts(&s)).transpose()?,
        processed_at: processed_at.map(|s| parse_ts(&s)).transpose()?,
        last_error: row.try_get("last_error")?,
    })
}

#[async_trait]
impl OutboxRepository for SqlUnitOfWork {
    async fn add(&mut self, event: OutboxEvent) -> Result<OutboxEvent> {
        if let Some(key) = event.idempotency_key.as_deref() {
            if let Some(existing) = self.find_by_idempotency_key(key).await? {
                return Err(CoreError::Conflict {
                    entity: "outbox_event".to_string(),
                    reason: format!("idempotency key {key} already recorded"),
                    existing: Some(Box::new(existing)),
                });
            }
        }
        let event_type = enum_to_col(&event.event_type)?;
        let status = enum_to_col(&event.status)?;
        let inserted = sqlx::query(
            "INSERT INTO outbox_events
                (event_id, event_type, aggregate_type, aggregate_id, payload, idempotency_key, status, retry_count, max_retries, created_at, claimed_at, processed_at, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(event.event_id.to_string())
        .bind(event_type)
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(serde_json::to_string(&event.payload)?)
        .bind(&event.idempotency_key)
        .bind(status)
        .bind(event.retry_count as i64)
        .bind(event.max_retries as i64)
        .bind(event.created_at.to_rfc3339())
        .bind(event.claimed_at.map(|t| t.to_rfc3339()))
        .bind(event.processed_at.map(|t| t.to_rfc3339()))
        .bind(&event.last_error)
        .fetch_one(&mut **self.tx())
        .await;

        // A concurrent transaction can win the race between our pre-check
        // above and this INSERT: both see no existing row, then both insert,
        // and the loser hits the `idempotency_key` UNIQUE constraint. Surface
        // that the same way the pre-check does — `Conflict` carrying the
        // winning row — rather than letting it fall through as a generic
        // `Database` error the caller has no idempotency-aware way to handle.
        let row = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                if let Some(key) = event.idempotency_key.as_deref() {
                    if let Some(existing) = self.find_by_idempotency_key(key).await? {
                        return Err(CoreError::Conflict {
                            entity: "outbox_event".to_string(),
                            reason: format!("idempotency key {key} already recorded"),
                            existing: Some(Box::new(existing)),
                        });
                    }
                }
                return Err(CoreError::Database(sqlx::Error::Database(db_err)));
            }
            Err(e) => return Err(e.into()),
        };
        row_to_outbox_event(&row)
    }

    async fn get_by_id(&mut self, id: i64) -> Result<OutboxEvent> {
        let row = sqlx::query("SELECT * FROM outbox_events WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **self.tx())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("outbox event {id}")))?;
        row_to_outbox_event(&row)
    }

    async fn find_by_idempotency_key(&mut self, key: &str) -> Result<Option<OutboxEvent>> {
        let row = sqlx::query("SELECT * FROM outbox_events WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&mut **self.tx())
            .await?;
        row.as_ref().map(row_to_outbox_event).transpose()
    }

    async fn claim_pending(&mut self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            "UPDATE outbox_events SET status = 'PROCESSING', claimed_at = ?
             WHERE id IN (
                 SELECT id FROM outbox_events WHERE status = 'PENDING' ORDER BY created_at LIMIT ?
             )
             RETURNING *",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&mut **self.tx())
        .await?;
        rows.iter().map(row_to_outbox_event).collect()
    }

    async fn get_failed_for_retry(&mut self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM outbox_events WHERE status = 'FAILED' AND retry_count < max_retries
             ORDER BY created_at LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&mut **self.tx())
        .await?;
        rows.iter().map(row_to_outbox_event).collect()
    }

    async fn update(&mut self, event: OutboxEvent) -> Result<()> {
        let id = event
            .id
            .ok_or_else(|| CoreError::validation("outbox event missing id on update"))?;
        let status = enum_to_col(&event.status)?;
        sqlx::query(
            "UPDATE outbox_events SET status = ?, retry_count = ?, claimed_at = ?, processed_at = ?, last_error = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(event.retry_count as i64)
        .bind(event.claimed_at.map(|t| t.to_rfc3339()))
        .bind(event.processed_at.map(|t| t.to_rfc3339()))
        .bind(&event.last_error)
        .bind(id)
        .execute(&mut **self.tx())
        .await?;
        Ok(())
    }

    async fn delete_processed(&mut self, before: DateTime<Utc>, limit: usize) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE id IN (
                 SELECT id FROM outbox_events WHERE status = 'PROCESSED' AND processed_at < ? LIMIT ?
             )",
        )
        .bind(before.to_rfc3339())
        .bind(limit as i64)
        .execute(&mut **self.tx())
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_stuck_processing(&mut self, stuck_after: DateTime<Utc>) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM outbox_events WHERE status = 'PROCESSING' AND claimed_at IS NOT NULL AND claimed_at < ?",
        )
        .bind(stuck_after.to_rfc3339())
        .fetch_all(&mut **self.tx())
        .await?;
        rows.iter().map(row_to_outbox_event).collect()
    }
}

fn row_to_checkpoint_file_link(row: &sqlx::sqlite::SqliteRow) -> Result<CheckpointFileLink> {
    let created_at: String = row.try_get("created_at")?;
    Ok(CheckpointFileLink {
        checkpoint_id: row.try_get("checkpoint_id")?,
        file_commit_id: row.try_get("file_commit_id")?,
        file_count: row.try_get("file_count")?,
        total_size_bytes: row.try_get("total_size_bytes")?,
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl CheckpointFileRepository for SqlUnitOfWork {
    async fn add(&mut self, link: CheckpointFileLink) -> Result<()> {
        sqlx::query(
            "INSERT INTO checkpoint_files (checkpoint_id, file_commit_id, file_count, total_size_bytes, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&link.checkpoint_id)
        .bind(&link.file_commit_id)
        .bind(link.file_count)
        .bind(link.total_size_bytes)
        .bind(link.created_at.to_rfc3339())
        .execute(&mut **self.tx())
        .await?;
        Ok(())
    }

    async fn get_for_checkpoint(&mut self, checkpoint_id: &str) -> Result<Option<CheckpointFileLink>> {
        let row = sqlx::query("SELECT * FROM checkpoint_files WHERE checkpoint_id = ?")
            .bind(checkpoint_id)
            .fetch_optional(&mut **self.tx())
            .await?;
        row.as_ref().map(row_to_checkpoint_file_link).transpose()
    }

    async fn list_all(&mut self) -> Result<Vec<CheckpointFileLink>> {
        let rows = sqlx::query("SELECT * FROM checkpoint_files")
            .fetch_all(&mut **self.tx())
            .await?;
        rows.iter().map(row_to_checkpoint_file_link).collect()
    }

    async fn delete_for_checkpoint(&mut self, checkpoint_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM checkpoint_files WHERE checkpoint_id = ?")
            .bind(checkpoint_id)
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }
}

fn row_to_file_commit(row: &sqlx::sqlite::SqliteRow) -> Result<FileCommit> {
    let entries: String = row.try_get("entries")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(FileCommit {
        id: row.try_get("id")?,
        entries: serde_json::from_str::<Vec<FileEntry>>(&entries)?,
        message: row.try_get("message")?,
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl FileCommitRepository for SqlUnitOfWork {
    async fn add(&mut self, commit: FileCommit) -> Result<()> {
        sqlx::query("INSERT INTO file_commits (id, entries, message, created_at) VALUES (?, ?, ?, ?)")
            .bind(&commit.id)
            .bind(serde_json::to_string(&commit.entries)?)
            .bind(&commit.message)
            .bind(commit.created_at.to_rfc3339())
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn get_by_id(&mut self, id: &str) -> Result<FileCommit> {
        let row = sqlx::query("SELECT * FROM file_commits WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **self.tx())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("file commit {id}")))?;
        row_to_file_commit(&row)
    }

    async fn list_all(&mut self) -> Result<Vec<FileCommit>> {
        let rows = sqlx::query("SELECT * FROM file_commits ORDER BY created_at")
            .fetch_all(&mut **self.tx())
            .await?;
        rows.iter().map(row_to_file_commit).collect()
    }
}

#[async_trait]
impl BlobRepository for SqlUnitOfWork {
    async fn put_if_absent(&mut self, blob: Blob) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO blobs (hash, bytes, created_at) VALUES (?, ?, ?)")
            .bind(&blob.hash)
            .bind(&blob.bytes)
            .bind(blob.created_at.to_rfc3339())
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn get_by_hash(&mut self, hash: &str) -> Result<Option<Blob>> {
        let row = sqlx::query("SELECT * FROM blobs WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&mut **self.tx())
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let created_at: String = row.try_get("created_at")?;
                Ok(Some(Blob {
                    hash: row.try_get("hash")?,
                    bytes: row.try_get("bytes")?,
                    created_at: parse_ts(&created_at)?,
                }))
            }
        }
    }

    async fn exists(&mut self, hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM blobs WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&mut **self.tx())
            .await?;
        Ok(row.is_some())
    }
}

fn row_to_node_boundary(row: &sqlx::sqlite::SqliteRow) -> Result<NodeBoundary> {
    let status: String = row.try_get("status")?;
    let started_at: String = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    Ok(NodeBoundary {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        session_id: row.try_get("session_id")?,
        node_id: row.try_get("node_id")?,
        entry_checkpoint_id: row.try_get("entry_checkpoint_id")?,
        exit_checkpoint_id: row.try_get("exit_checkpoint_id")?,
        status: col_to_enum::<BoundaryStatus>(&status)?,
        tool_count: row.try_get("tool_count")?,
        started_at: parse_ts(&started_at)?,
        completed_at: completed_at.map(|s| parse_ts(&s)).transpose()?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl NodeBoundaryRepository for SqlUnitOfWork {
    async fn add(&mut self, boundary: NodeBoundary) -> Result<NodeBoundary> {
        let status = enum_to_col(&boundary.status)?;
        let row = sqlx::query(
            "INSERT INTO node_boundaries
                (execution_id, session_id, node_id, entry_checkpoint_id, exit_checkpoint_id, status, tool_count, started_at, completed_at, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&boundary.execution_id)
        .bind(boundary.session_id)
        .bind(&boundary.node_id)
        .bind(&boundary.entry_checkpoint_id)
        .bind(&boundary.exit_checkpoint_id)
        .bind(status)
        .bind(boundary.tool_count)
        .bind(boundary.started_at.to_rfc3339())
        .bind(boundary.completed_at.map(|t| t.to_rfc3339()))
        .bind(&boundary.error_message)
        .fetch_one(&mut **self.tx())
        .await?;
        row_to_node_boundary(&row)
    }

    async fn update(&mut self, boundary: NodeBoundary) -> Result<()> {
        let id = boundary
            .id
            .ok_or_else(|| CoreError::validation("node boundary missing id on update"))?;
        let status = enum_to_col(&boundary.status)?;
        sqlx::query(
            "UPDATE node_boundaries SET exit_checkpoint_id = ?, status = ?, tool_count = ?, completed_at = ?, error_message = ?
             WHERE id = ?",
        )
        .bind(&boundary.exit_checkpoint_id)
        .bind(status)
        .bind(boundary.tool_count)
        .bind(boundary.completed_at.map(|t| t.to_rfc3339()))
        .bind(&boundary.error_message)
        .bind(id)
        .execute(&mut **self.tx())
        .await?;
        Ok(())
    }

    async fn get_open_for_session(&mut self, session_id: i64) -> Result<Option<NodeBoundary>> {
        let row = sqlx::query("SELECT * FROM node_boundaries WHERE session_id = ? AND status = 'STARTED'")
            .bind(session_id)
            .fetch_optional(&mut **self.tx())
            .await?;
        row.as_ref().map(row_to_node_boundary).transpose()
    }

    async fn list_for_execution(&mut self, execution_id: &str) -> Result<Vec<NodeBoundary>> {
        let rows = sqlx::query("SELECT * FROM node_boundaries WHERE execution_id = ? ORDER BY started_at")
            .bind(execution_id)
            .fetch_all(&mut **self.tx())
            .await?;
        rows.iter().map(row_to_node_boundary).collect()
    }
}
