//! The outbox processor (spec §4.5, C8).
//!
//! Grounded in `original_source/wtb/infrastructure/outbox/processor.py`'s
//! `OutboxProcessor`: a poll loop that claims a batch of `PENDING` events,
//! dispatches each to a handler keyed by [`OutboxEventType`], and commits or
//! fails each event independently so one bad event never blocks the rest of
//! the batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::{OutboxEvent, OutboxEventType};
use crate::error::{CoreError, Result};
use crate::file_tracking::FileTrackingService;
use crate::repositories::{BlobRepository, CheckpointFileRepository, FileCommitRepository, OutboxRepository};
use crate::uow::UnitOfWorkFactory;
use wf_checkpoint::CheckpointStore;

/// Polls the outbox table and reconciles each event against its secondary
/// store. Runs in a background task; `process_once` is also exposed directly
/// so tests and the batch coordinator can drive it synchronously.
pub struct OutboxProcessor {
    factory: Arc<dyn UnitOfWorkFactory>,
    checkpoints: Arc<dyn CheckpointStore>,
    file_tracking: Arc<FileTrackingService>,
    config: Config,
    running: Arc<AtomicBool>,
}

/// Outcome of one `process_once` pass, for tests and callers that want
/// visibility without parsing logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
}

impl OutboxProcessor {
    pub fn new(
        factory: Arc<dyn UnitOfWorkFactory>,
        checkpoints: Arc<dyn CheckpointStore>,
        file_tracking: Arc<FileTrackingService>,
        config: Config,
    ) -> Self {
        Self {
            factory,
            checkpoints,
            file_tracking,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the poll loop. `stop` is observed between batches, not
    /// mid-batch, mirroring the source's cooperative shutdown. Before
    /// entering the loop, runs the recovery pass of spec §4.5: any event
    /// left `PROCESSING` by a processor that crashed mid-dispatch is reset
    /// to `PENDING` so this instance picks it back up.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            info!("outbox processor starting");
            match self.recover_stuck_events(self.config.outbox_stuck_after).await {
                Ok(0) => {}
                Ok(recovered) => warn!(recovered, "recovered events stuck in PROCESSING at startup"),
                Err(e) => error!(error = %e, "stuck-event recovery pass failed"),
            }
            while self.running.load(Ordering::SeqCst) {
                match self.process_once().await {
                    Ok(outcome) if outcome.processed > 0 || outcome.failed > 0 => {
                        debug!(processed = outcome.processed, failed = outcome.failed, "outbox batch processed");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "outbox batch failed"),
                }
                tokio::time::sleep(self.config.outbox_poll_interval).await;
            }
            info!("outbox processor stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Claims and dispatches one batch. Each event commits or fails on its
    /// own unit of work; a panic-free failure in one handler never aborts
    /// the rest of the batch (spec §4.5).
    pub async fn process_once(&self) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let claimed = {
            let mut uow = self.factory.begin().await?;
            let events = uow.outbox().claim_pending(self.config.outbox_batch_size).await?;
            uow.commit().await?;
            events
        };

        for event in claimed {
            match self.dispatch(&event).await {
                Ok(()) => {
                    self.finish_success(event).await?;
                    outcome.processed += 1;
                }
                Err(e) => {
                    warn!(event_id = ?event.id, event_type = ?event.event_type, error = %e, "outbox handler failed");
                    self.finish_failure(event, &e.to_string()).await?;
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn finish_success(&self, mut event: OutboxEvent) -> Result<()> {
        event.mark_processed();
        let mut uow = self.factory.begin().await?;
        uow.outbox().update(event).await?;
        uow.commit().await
    }

    async fn finish_failure(&self, mut event: OutboxEvent, reason: &str) -> Result<()> {
        event.mark_failed(reason);
        let mut uow = self.factory.begin().await?;
        uow.outbox().update(event).await?;
        uow.commit().await
    }

    /// The closed handler table. Every [`OutboxEventType`] variant is
    /// matched explicitly — a new variant that is not also wired up here is
    /// a compile error, not a silent no-op, once `#[deny(unreachable_patterns)]`-
    /// style exhaustiveness is relied upon.
    async fn dispatch(&self, event: &OutboxEvent) -> Result<()> {
        use OutboxEventType::*;
        match event.event_type {
            CheckpointCreate | CheckpointVerify => self.verify_checkpoint(event).await,
            NodeBoundarySync => self.sync_node_boundary(event).await,
            FileCommitLink => self.verify_file_commit(event).await,
            FileCommitVerify => self.verify_file_commit(event).await,
            FileBlobVerify => self.verify_blobs(event).await,
            CheckpointFileLinkVerify => self.verify_checkpoint_file_link(event).await,
            RollbackFileRestore => self.restore_rollback_files(event).await,
            // Audit-trail notifications about state already committed in
            // Phase 1 (spec §4.6's two-phase discipline). No secondary
            // store to reconcile against; processing them is just marking
            // the record observed.
            RollbackVerify | ExecutionPaused | ExecutionResumed | ExecutionStopped
            | StateModified | WorkflowCreated | BatchTestCreated | BatchTestCancelled
            | ExecutionForked | RollbackPerformed | CheckpointSaved | FileTracked | RayEvent => {
                Ok(())
            }
        }
    }

    async fn verify_checkpoint(&self, event: &OutboxEvent) -> Result<()> {
        let checkpoint_id = event
            .payload
            .get("checkpoint_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::validation("checkpoint event missing checkpoint_id"))?;
        self.checkpoints
            .load_checkpoint(checkpoint_id)
            .await
            .map_err(|e| CoreError::TransientExternal(e.to_string()))?;
        Ok(())
    }

    async fn sync_node_boundary(&self, event: &OutboxEvent) -> Result<()> {
        let session_id = event
            .payload
            .get("session_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| CoreError::validation("node boundary event missing session_id"))?;
        if !self.checkpoints.session_exists(session_id).await? {
            return Err(CoreError::TransientExternal(format!(
                "checkpoint session {session_id} not found during boundary sync"
            )));
        }
        Ok(())
    }

    async fn verify_file_commit(&self, event: &OutboxEvent) -> Result<()> {
        let commit_id = event
            .payload
            .get("file_commit_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::validation("file commit event missing file_commit_id"))?;
        let mut uow = self.factory.begin().await?;
        uow.file_commits().get_by_id(commit_id).await?;
        uow.commit().await
    }

    async fn verify_blobs(&self, event: &OutboxEvent) -> Result<()> {
        let hashes = event
            .payload
            .get("blob_hashes")
            .and_then(|v| v.as_array())
            .ok_or_else(|| CoreError::validation("file blob event missing blob_hashes"))?;
        let mut uow = self.factory.begin().await?;
        for hash in hashes {
            let hash = hash
                .as_str()
                .ok_or_else(|| CoreError::validation("blob_hashes entry not a string"))?;
            if !uow.blobs().exists(hash).await? {
                if self.config.outbox_strict_verification {
                    return Err(CoreError::CorruptState(format!("missing blob {hash}")));
                }
                warn!(hash, "blob referenced by outbox event not found");
            }
        }
        uow.commit().await
    }

    async fn verify_checkpoint_file_link(&self, event: &OutboxEvent) -> Result<()> {
        let checkpoint_id = event
            .payload
            .get("checkpoint_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::validation("link event missing checkpoint_id"))?;
        let mut uow = self.factory.begin().await?;
        let link = uow.checkpoint_files().get_for_checkpoint(checkpoint_id).await?;
        uow.commit().await?;
        if link.is_none() {
            return Err(CoreError::TransientExternal(format!(
                "checkpoint file link for {checkpoint_id} not yet visible"
            )));
        }
        Ok(())
    }

    async fn restore_rollback_files(&self, event: &OutboxEvent) -> Result<()> {
        let commit_id = event
            .payload
            .get("file_commit_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::validation("rollback restore event missing file_commit_id"))?;
        let mut uow = self.factory.begin().await?;
        let commit = uow.file_commits().get_by_id(commit_id).await?;
        uow.commit().await?;
        self.file_tracking.restore_commit(&commit).await
    }

    /// Deletes `PROCESSED` events older than `outbox_retention_days`,
    /// `limit` rows at a time (spec §4.2 garbage collection).
    pub async fn cleanup_old_events(&self, limit: usize) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.outbox_retention_days);
        let mut uow = self.factory.begin().await?;
        let deleted = uow.outbox().delete_processed(cutoff, limit).await?;
        uow.commit().await?;
        Ok(deleted)
    }

    /// Resets `FAILED` events that still have retries left back to
    /// `PENDING`. Only events under `max_retries` are touched — exhausted
    /// events stay `FAILED` permanently (spec §4.2, SPEC_FULL §11).
    pub async fn retry_failed_events(&self, limit: usize) -> Result<u64> {
        let mut uow = self.factory.begin().await?;
        let candidates = uow.outbox().get_failed_for_retry(limit).await?;
        let count = candidates.len() as u64;
        for mut event in candidates {
            event.reset_for_retry();
            uow.outbox().update(event).await?;
        }
        uow.commit().await?;
        Ok(count)
    }

    /// Recovers events left in `PROCESSING` by a processor that crashed
    /// mid-dispatch, resetting them to `PENDING` once `stuck_after` has
    /// elapsed since they were claimed.
    pub async fn recover_stuck_events(&self, stuck_after: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - stuck_after;
        let mut uow = self.factory.begin().await?;
        let stuck = uow.outbox().find_stuck_processing(cutoff).await?;
        let count = stuck.len() as u64;
        for mut event in stuck {
            event.reset_for_retry();
            uow.outbox().update(event).await?;
        }
        uow.commit().await?;
        Ok(count)
    }
}
