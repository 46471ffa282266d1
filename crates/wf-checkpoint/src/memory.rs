//! In-memory reference implementation of [`CheckpointStore`].
//!
//! Grounded in `langgraph-checkpoint::memory::InMemoryCheckpointSaver`: a
//! single `parking_lot::RwLock`-guarded table, with ordering and rollback
//! semantics implemented directly rather than delegated, since this is the
//! reference implementation the rest of the workspace's tests run against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointStore;
use crate::types::{CheckpointRecord, ExecutionState, SaveTrigger};

#[derive(Default)]
struct Inner {
    sessions: HashMap<i64, SessionState>,
    checkpoints: HashMap<String, CheckpointRecord>,
}

struct SessionState {
    execution_id: String,
    current_state: ExecutionState,
    ordinal_cursor: i64,
}

/// Thread-safe in-memory checkpoint store.
pub struct InMemoryCheckpointStore {
    inner: RwLock<Inner>,
    next_session_id: AtomicI64,
    next_checkpoint_seq: AtomicI64,
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_session_id: AtomicI64::new(1),
            next_checkpoint_seq: AtomicI64::new(1),
        }
    }

    /// Opaque checkpoint identity, independent of `seq`'s ordering role —
    /// mirrors `langgraph-checkpoint`'s UUID checkpoint ids.
    fn mint_checkpoint_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn initialize_session(
        &self,
        execution_id: &str,
        initial_state: ExecutionState,
    ) -> Result<i64> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write();
        inner.sessions.insert(
            session_id,
            SessionState {
                execution_id: execution_id.to_string(),
                current_state: initial_state,
                ordinal_cursor: 0,
            },
        );
        Ok(session_id)
    }

    async fn save_checkpoint(
        &self,
        session_id: i64,
        state: ExecutionState,
        node_id: Option<String>,
        trigger: SaveTrigger,
        name: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<CheckpointRecord> {
        let seq = self.next_checkpoint_seq.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| CheckpointError::NotFound(format!("session {session_id}")))?;

        session.ordinal_cursor += 1;
        let ordinal = session.ordinal_cursor;
        session.current_state = state.clone();

        let record = CheckpointRecord {
            id: Self::mint_checkpoint_id(),
            seq,
            session_id,
            state,
            node_id,
            trigger,
            name,
            metadata,
            tool_track_ordinal: ordinal,
            created_at: Utc::now(),
        };
        inner.checkpoints.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<CheckpointRecord> {
        let inner = self.inner.read();
        inner
            .checkpoints
            .get(checkpoint_id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(format!("checkpoint {checkpoint_id}")))
    }

    async fn get_checkpoints(
        &self,
        session_id: i64,
        node_id: Option<&str>,
    ) -> Result<Vec<CheckpointRecord>> {
        let inner = self.inner.read();
        let mut records: Vec<CheckpointRecord> = inner
            .checkpoints
            .values()
            .filter(|cp| cp.session_id == session_id)
            .filter(|cp| match node_id {
                Some(n) => cp.node_id.as_deref() == Some(n),
                None => true,
            })
            .cloned()
            .collect();
        records.sort_by_key(|cp| cp.tool_track_ordinal);
        Ok(records)
    }

    async fn rollback(&self, checkpoint_id: &str) -> Result<ExecutionState> {
        let mut inner = self.inner.write();
        let target = inner
            .checkpoints
            .get(checkpoint_id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(format!("checkpoint {checkpoint_id}")))?;

        // Tie-break: among checkpoints in this session sharing the target's
        // ordinal, prefer the one with the greatest checkpoint id/seq.
        let winner = inner
            .checkpoints
            .values()
            .filter(|cp| {
                cp.session_id == target.session_id
                    && cp.tool_track_ordinal == target.tool_track_ordinal
            })
            .max_by_key(|cp| cp.tie_break_key())
            .cloned()
            .unwrap_or(target);

        let session = inner
            .sessions
            .get_mut(&winner.session_id)
            .ok_or_else(|| CheckpointError::NotFound(format!("session {}", winner.session_id)))?;
        session.current_state = winner.state.clone();
        session.ordinal_cursor = winner.tool_track_ordinal;

        Ok(winner.state)
    }

    async fn create_branch(&self, checkpoint_id: &str) -> Result<i64> {
        let source = self.load_checkpoint(checkpoint_id).await?;
        let new_session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write();
        let execution_id = inner
            .sessions
            .get(&source.session_id)
            .map(|s| s.execution_id.clone())
            .unwrap_or_default();
        inner.sessions.insert(
            new_session_id,
            SessionState {
                execution_id,
                current_state: source.state,
                ordinal_cursor: source.tool_track_ordinal,
            },
        );
        Ok(new_session_id)
    }

    async fn session_exists(&self, session_id: i64) -> Result<bool> {
        Ok(self.inner.read().sessions.contains_key(&session_id))
    }

    async fn list_checkpoint_ids(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().checkpoints.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(var: &str, value: serde_json::Value) -> ExecutionState {
        let mut state = ExecutionState::empty();
        state.workflow_variables.insert(var.to_string(), value);
        state
    }

    #[tokio::test]
    async fn initialize_then_save_and_load_round_trips() {
        let store = InMemoryCheckpointStore::new();
        let session_id = store
            .initialize_session("exec-1", ExecutionState::empty())
            .await
            .unwrap();

        let cp = store
            .save_checkpoint(
                session_id,
                state_with("x", serde_json::json!(1)),
                Some("node-a".to_string()),
                SaveTrigger::NodeExit,
                None,
                HashMap::new(),
            )
            .await
            .unwrap();

        let loaded = store.load_checkpoint(&cp.id).await.unwrap();
        assert_eq!(loaded.state.workflow_variables["x"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn rollback_restores_prior_state() {
        let store = InMemoryCheckpointStore::new();
        let session_id = store
            .initialize_session("exec-1", ExecutionState::empty())
            .await
            .unwrap();

        let cp1 = store
            .save_checkpoint(
                session_id,
                state_with("step", serde_json::json!(1)),
                None,
                SaveTrigger::Auto,
                None,
                HashMap::new(),
            )
            .await
            .unwrap();

        store
            .save_checkpoint(
                session_id,
                state_with("step", serde_json::json!(2)),
                None,
                SaveTrigger::Auto,
                None,
                HashMap::new(),
            )
            .await
            .unwrap();

        let restored = store.rollback(&cp1.id).await.unwrap();
        assert_eq!(restored.workflow_variables["step"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn create_branch_is_non_destructive() {
        let store = InMemoryCheckpointStore::new();
        let session_id = store
            .initialize_session("exec-1", ExecutionState::empty())
            .await
            .unwrap();
        let cp = store
            .save_checkpoint(
                session_id,
                state_with("step", serde_json::json!(1)),
                None,
                SaveTrigger::Auto,
                None,
                HashMap::new(),
            )
            .await
            .unwrap();

        let branch_session = store.create_branch(&cp.id).await.unwrap();
        assert_ne!(branch_session, session_id);
        assert!(store.session_exists(session_id).await.unwrap());
        assert!(store.session_exists(branch_session).await.unwrap());
    }

    #[tokio::test]
    async fn load_missing_checkpoint_is_not_found() {
        let store = InMemoryCheckpointStore::new();
        let err = store.load_checkpoint("nope").await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }
}
