//! End-to-end scenario tests, one per spec §8 example.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use wf_checkpoint::InMemoryCheckpointStore;
use wf_core::batch_coordinator::BatchExecutionCoordinator;
use wf_core::cleanup::FileCleanupService;
use wf_core::config::Config;
use wf_core::domain::{CheckpointFileLink, Execution, ExecutionStatus, OutboxEvent, OutboxEventType};
use wf_core::execution_controller::ExecutionController;
use wf_core::file_tracking::FileTrackingService;
use wf_core::integrity::IntegrityChecker;
use wf_core::outbox::OutboxProcessor;
use wf_core::repositories::*;
use wf_core::state_adapter::StateAdapter;
use wf_core::uow::{InMemoryDatabase, InMemoryUnitOfWorkFactory, UnitOfWorkFactory};

fn in_memory_factory() -> Arc<dyn UnitOfWorkFactory> {
    Arc::new(InMemoryUnitOfWorkFactory::new(InMemoryDatabase::new()))
}

/// S1: Outbox happy path — a `CHECKPOINT_VERIFY` event against a checkpoint
/// that exists drains to PROCESSED within a few poll cycles.
#[tokio::test]
async fn s1_outbox_happy_path() {
    let factory = in_memory_factory();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let session_id = checkpoints.initialize_session("exec-1", Default::default()).await.unwrap();
    let cp = checkpoints
        .save_checkpoint(session_id, Default::default(), None, wf_checkpoint::SaveTrigger::Auto, None, HashMap::new())
        .await
        .unwrap();

    let file_tracking = Arc::new(FileTrackingService::new(factory.clone(), PathBuf::from(".")));
    let processor = OutboxProcessor::new(factory.clone(), checkpoints.clone(), file_tracking, Config::default());

    let mut uow = factory.begin().await.unwrap();
    uow.outbox()
        .add(OutboxEvent::new(
            OutboxEventType::CheckpointVerify,
            "execution",
            "exec-1",
            serde_json::json!({"checkpoint_id": cp.id}),
            None,
            5,
        ))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    for _ in 0..3 {
        processor.process_once().await.unwrap();
    }

    let mut uow = factory.begin().await.unwrap();
    let pending = uow.outbox().claim_pending(100).await.unwrap();
    assert!(pending.is_empty());
}

/// S2: Outbox retry — a `FILE_COMMIT_VERIFY` event against a not-yet-visible
/// commit fails, is retried, and succeeds once the commit exists.
#[tokio::test]
async fn s2_outbox_retry_then_success() {
    let factory = in_memory_factory();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let file_tracking = Arc::new(FileTrackingService::new(factory.clone(), PathBuf::from(".")));
    let processor = OutboxProcessor::new(factory.clone(), checkpoints, file_tracking.clone(), Config::default());

    let mut uow = factory.begin().await.unwrap();
    let event = uow
        .outbox()
        .add(OutboxEvent::new(
            OutboxEventType::FileCommitVerify,
            "file_commit",
            "commit-1",
            serde_json::json!({"file_commit_id": "commit-1"}),
            None,
            5,
        ))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    processor.process_once().await.unwrap();
    let mut uow = factory.begin().await.unwrap();
    let after_first = uow.outbox().get_by_id(event.id.unwrap()).await.unwrap();
    uow.commit().await.unwrap();
    assert_eq!(after_first.retry_count, 1);
    assert!(after_first.last_error.is_some());

    processor.retry_failed_events(10).await.unwrap();
    processor.process_once().await.unwrap();
    let mut uow = factory.begin().await.unwrap();
    let after_second = uow.outbox().get_by_id(event.id.unwrap()).await.unwrap();
    uow.commit().await.unwrap();
    assert_eq!(after_second.retry_count, 2);

    // commit now exists; the next retry succeeds.
    uow = factory.begin().await.unwrap();
    uow.file_commits()
        .add(wf_core::domain::FileCommit::new("commit-1", vec![], None))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    processor.retry_failed_events(10).await.unwrap();
    processor.process_once().await.unwrap();
    let mut uow = factory.begin().await.unwrap();
    let after_third = uow.outbox().get_by_id(event.id.unwrap()).await.unwrap();
    uow.commit().await.unwrap();
    assert_eq!(after_third.retry_count, 2);
    assert_eq!(after_third.status, wf_core::domain::OutboxStatus::Processed);
}

/// S3: Idempotent pause — the same idempotency key on a second call returns
/// the first call's outbox event id, and exactly one event is recorded.
#[tokio::test]
async fn s3_idempotent_pause() {
    let factory = in_memory_factory();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let state_adapter = Arc::new(StateAdapter::new(checkpoints.clone(), factory.clone(), 5));
    let controller = ExecutionController::new(factory.clone(), state_adapter, 5);

    let mut uow = factory.begin().await.unwrap();
    uow.executions().add(Execution::new("exec-E", "wf-1")).await.unwrap();
    uow.commit().await.unwrap();
    controller.run("exec-E").await.unwrap();

    let (first_exec, first_event_id) = controller.pause_idempotent("exec-E", "req-abc").await.unwrap();
    let (second_exec, second_event_id) = controller.pause_idempotent("exec-E", "req-abc").await.unwrap();

    assert_eq!(first_event_id, second_event_id);
    assert_eq!(first_exec.status, ExecutionStatus::Paused);
    assert_eq!(second_exec.status, ExecutionStatus::Paused);

    let mut uow = factory.begin().await.unwrap();
    let pending = uow.outbox().claim_pending(100).await.unwrap();
    let paused_events: Vec<_> = pending
        .iter()
        .filter(|e| e.event_type == OutboxEventType::ExecutionPaused && e.aggregate_id == "exec-E")
        .collect();
    assert_eq!(paused_events.len(), 1);
}

/// S4: Rollback with files — rolling back to a checkpoint whose linked file
/// commit had different contents restores those contents on disk once the
/// outbox processor drains the `ROLLBACK_FILE_RESTORE` event.
#[tokio::test]
async fn s4_rollback_restores_linked_files() {
    let dir = tempfile::tempdir().unwrap();
    let factory = in_memory_factory();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let state_adapter = Arc::new(StateAdapter::new(checkpoints.clone(), factory.clone(), 5));
    let controller = Arc::new(ExecutionController::new(factory.clone(), state_adapter, 5));
    let coordinator = BatchExecutionCoordinator::new(factory.clone(), controller.clone(), 5);
    let file_tracking = Arc::new(FileTrackingService::new(factory.clone(), dir.path().to_path_buf()));

    let mut uow = factory.begin().await.unwrap();
    uow.executions().add(Execution::new("exec-E", "wf-1")).await.unwrap();
    uow.commit().await.unwrap();
    controller.run("exec-E").await.unwrap();

    tokio::fs::write(dir.path().join("data.csv"), "a\n").await.unwrap();
    let commit = file_tracking
        .track_and_link("commit-c2", "cp-2", &[PathBuf::from("data.csv")], None)
        .await
        .unwrap();
    assert_eq!(commit.entries.len(), 1);

    tokio::fs::write(dir.path().join("data.csv"), "a\nb\n").await.unwrap();

    // Seed a checkpoint the state adapter's rollback can resolve.
    let session_id = checkpoints.initialize_session("exec-E", Default::default()).await.unwrap();
    let mut uow = factory.begin().await.unwrap();
    let mut exec = uow.executions().get_by_id("exec-E").await.unwrap();
    exec.session_id = Some(session_id);
    uow.executions().update(exec).await.unwrap();
    uow.commit().await.unwrap();
    checkpoints
        .save_checkpoint(session_id, Default::default(), None, wf_checkpoint::SaveTrigger::Auto, None, HashMap::new())
        .await
        .unwrap();

    let mut uow = factory.begin().await.unwrap();
    uow.checkpoint_files()
        .add(CheckpointFileLink::new("cp-2", "commit-c2", 1, 2))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    // cp-2 above is a placeholder id for the link; rollback against the real
    // minted checkpoint id instead, then restore commit-c2 directly since
    // the state adapter does not know about cp-2's file linkage.
    let real_checkpoints = checkpoints.get_checkpoints(session_id, None).await.unwrap();
    let real_cp_id = &real_checkpoints[0].id;

    let mut uow = factory.begin().await.unwrap();
    uow.checkpoint_files()
        .add(CheckpointFileLink::new(real_cp_id.clone(), "commit-c2", 1, 2))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    coordinator.rollback("exec-E", real_cp_id, None).await.unwrap();

    let processor = OutboxProcessor::new(factory.clone(), checkpoints.clone(), file_tracking.clone(), Config::default());
    for _ in 0..3 {
        processor.process_once().await.unwrap();
    }

    let restored = tokio::fs::read_to_string(dir.path().join("data.csv")).await.unwrap();
    assert_eq!(restored, "a\n");
}

/// S5: Orphan cleanup with cap — refuses to delete more than `max_files`
/// unless `dry_run` is set, and leaves disk untouched on refusal.
#[tokio::test]
async fn s5_orphan_cleanup_respects_cap() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..200 {
        tokio::fs::write(dir.path().join(format!("f{i}.py")), "x").await.unwrap();
    }
    let factory = in_memory_factory();
    let tracker = FileTrackingService::new(factory, dir.path().to_path_buf());
    let service = FileCleanupService::new(dir.path().to_path_buf(), 100);

    let orphaned = service
        .identify_orphaned_files("cp-target", &["*.py".to_string()], &[], &tracker)
        .await
        .unwrap();
    assert_eq!(orphaned.len(), 200);

    let refused = service.cleanup_orphaned_files(&orphaned, false, None).await.unwrap();
    assert_eq!(refused.skipped, orphaned);
    assert!(refused.deleted.is_empty());
    assert_eq!(refused.errors.len(), 1);

    for i in 0..200 {
        assert!(dir.path().join(format!("f{i}.py")).exists());
    }
}

/// S6: Integrity repair — a dangling checkpoint/file link and a stuck
/// outbox event are both reported and both auto-repaired.
#[tokio::test]
async fn s6_integrity_repair_clears_reported_issues() {
    let factory = in_memory_factory();
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    let mut uow = factory.begin().await.unwrap();
    uow.checkpoint_files()
        .add(CheckpointFileLink::new("cp-missing", "commit-missing", 0, 0))
        .await
        .unwrap();
    let mut stuck_event = OutboxEvent::new(
        OutboxEventType::FileCommitVerify,
        "file_commit",
        "commit-x",
        serde_json::json!({}),
        None,
        5,
    );
    stuck_event.created_at = chrono::Utc::now() - chrono::Duration::minutes(10);
    let stuck_event = uow.outbox().add(stuck_event).await.unwrap();
    uow.outbox().claim_pending(10).await.unwrap();
    // `claim_pending` stamps `claimed_at` with "now"; back-date it so the
    // scan's stuck-since-claimed window (not age-since-created) actually
    // treats this event as abandoned.
    let mut claimed = uow.outbox().get_by_id(stuck_event.id.unwrap()).await.unwrap();
    claimed.claimed_at = Some(chrono::Utc::now() - chrono::Duration::minutes(10));
    uow.outbox().update(claimed).await.unwrap();
    uow.commit().await.unwrap();

    let checker = IntegrityChecker::new(factory.clone(), checkpoints, chrono::Duration::minutes(5));
    let report = checker.scan().await.unwrap();

    let types: Vec<_> = report.issues.iter().map(|i| i.issue_type).collect();
    assert!(types.contains(&wf_core::domain::IssueType::DanglingReference));
    assert!(types.contains(&wf_core::domain::IssueType::OutboxStuck));

    // Both halves of the dangling link ("cp-missing" and "commit-missing")
    // plus the one stuck outbox event are all auto-repairable.
    let repaired = checker.repair(&report).await.unwrap();
    assert_eq!(repaired, 3);

    let report_after = checker.scan().await.unwrap();
    assert_eq!(report_after.critical_count(), 0);
}
