//! The outbox event model (spec §4.2, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of outbox event types, merged from both `outbox.py` factory
/// methods found under `original_source/` (SPEC_FULL §11) and the handler
/// table `processor.py` dispatches on. Closed deliberately: a new event kind
/// entering the system without a matching handler is a bug, not data, so
/// [`crate::error::CoreError::NoHandler`] exists to catch it at the point of
/// dispatch rather than at the edge of an open-ended string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxEventType {
    CheckpointCreate,
    CheckpointVerify,
    NodeBoundarySync,
    FileCommitLink,
    FileCommitVerify,
    FileBlobVerify,
    CheckpointFileLinkVerify,
    RollbackFileRestore,
    RollbackVerify,
    ExecutionPaused,
    ExecutionResumed,
    ExecutionStopped,
    StateModified,
    WorkflowCreated,
    BatchTestCreated,
    BatchTestCancelled,
    ExecutionForked,
    RollbackPerformed,
    CheckpointSaved,
    FileTracked,
    RayEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

/// A durable, at-least-once record of work to be reconciled against a
/// secondary store after the primary transaction that created it commits.
///
/// Written in the same unit of work as the business change it describes
/// (spec I3); dispatched and retried by `outbox::OutboxProcessor` strictly
/// outside that transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Relational primary key. `None` until a repository assigns one on
    /// insert.
    pub id: Option<i64>,
    /// Stable external identity (spec §6's `event_id UUID UNIQUE`),
    /// independent of the relational primary key, returned to a caller that
    /// retries a client-level action against the same idempotency key.
    pub event_id: Uuid,
    pub event_type: OutboxEventType,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    /// Dedup key for client-retried effectful requests (spec §4.2,
    /// SPEC_FULL §11). `None` for internally generated audit events that
    /// carry no idempotency contract.
    pub idempotency_key: Option<String>,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// Set when a processor claims the event (`PENDING -> PROCESSING`) and
    /// cleared on [`Self::reset_for_retry`]. Stuck-event detection (spec
    /// §4.5/§4.8) keys off this, not `created_at`, so an event that sat
    /// PENDING for a long time before being claimed isn't mistaken for one
    /// stuck mid-processing.
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    pub fn new(
        event_type: OutboxEventType,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: None,
            event_id: Uuid::new_v4(),
            event_type,
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            idempotency_key,
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            claimed_at: None,
            processed_at: None,
            last_error: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.status == OutboxStatus::Failed && self.retry_count < self.max_retries
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, OutboxStatus::Processed)
            || (self.status == OutboxStatus::Failed && !self.can_retry())
    }

    pub fn mark_processing(&mut self) {
        self.status = OutboxStatus::Processing;
        self.claimed_at = Some(Utc::now());
    }

    pub fn mark_processed(&mut self) {
        self.status = OutboxStatus::Processed;
        self.processed_at = Some(Utc::now());
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.status = OutboxStatus::Failed;
    }

    /// Resets a `Failed` event back to `Pending` for another processor pass.
    /// Callers must check [`Self::can_retry`] first; this does not itself
    /// enforce the `max_retries` ceiling.
    pub fn reset_for_retry(&mut self) {
        self.status = OutboxStatus::Pending;
        self.claimed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OutboxEvent {
        OutboxEvent::new(
            OutboxEventType::CheckpointVerify,
            "checkpoint",
            "cp-1",
            serde_json::json!({}),
            None,
            3,
        )
    }

    #[test]
    fn retry_count_is_bounded_by_max_retries() {
        let mut ev = sample();
        for _ in 0..3 {
            assert!(ev.can_retry() || ev.status == OutboxStatus::Pending);
            ev.mark_failed("boom");
        }
        assert_eq!(ev.retry_count, 3);
        assert!(!ev.can_retry());
    }

    #[test]
    fn processed_event_is_terminal() {
        let mut ev = sample();
        ev.mark_processing();
        ev.mark_processed();
        assert!(ev.is_terminal());
        assert!(ev.processed_at.is_some());
    }
}
