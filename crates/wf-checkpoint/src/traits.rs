//! The `CheckpointStore` trait: the anti-corruption boundary C5 adapts to.
//!
//! Grounded in `langgraph-checkpoint::traits::CheckpointSaver`, reshaped to
//! the operations spec §4.3 names (`initializeSession`, `saveCheckpoint`,
//! `loadCheckpoint`, `getCheckpoints`, `rollback`, `createBranch`) instead of
//! langgraph's per-channel `put`/`put_writes`/`get_tuple`. This crate never
//! implements rollback/branch-as-write itself; those remain semantics the
//! concrete store must provide, exactly as the real external checkpoint
//! store is treated as a black box by spec.md §1.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CheckpointRecord, ExecutionState, SaveTrigger};

/// Anti-corruption boundary over the external checkpoint store.
///
/// Implementations must be `Send + Sync` because the coordinator (C10)
/// deliberately reuses a single instance across operations (spec §5,
/// "Shared-resource policy").
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Create a new session for `execution_id` seeded with `initial_state`.
    /// Returns the session id assigned by the store.
    async fn initialize_session(
        &self,
        execution_id: &str,
        initial_state: ExecutionState,
    ) -> Result<i64>;

    /// Append a checkpoint to `session_id`.
    async fn save_checkpoint(
        &self,
        session_id: i64,
        state: ExecutionState,
        node_id: Option<String>,
        trigger: SaveTrigger,
        name: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<CheckpointRecord>;

    /// Load a checkpoint by id. Fails with `NotFound` if absent.
    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<CheckpointRecord>;

    /// List checkpoints for a session, ordered by tool-track ordinal,
    /// optionally filtered to a single node.
    async fn get_checkpoints(
        &self,
        session_id: i64,
        node_id: Option<&str>,
    ) -> Result<Vec<CheckpointRecord>>;

    /// Restore the session's state to `checkpoint_id`, reversing the
    /// tool-track to that checkpoint's ordinal. Returns the restored state.
    ///
    /// When multiple checkpoints share a tool-track ordinal, the store must
    /// prefer the one with the greater checkpoint id (spec §4.3).
    async fn rollback(&self, checkpoint_id: &str) -> Result<ExecutionState>;

    /// Non-destructively branch off `checkpoint_id`, creating and returning
    /// a fresh session id that becomes current going forward.
    async fn create_branch(&self, checkpoint_id: &str) -> Result<i64>;

    /// Whether a session has been initialized (used to check invariant I5).
    async fn session_exists(&self, session_id: i64) -> Result<bool>;

    /// Every checkpoint id currently known to the store, used by the
    /// integrity checker (spec §4.8 step 2) to find checkpoints no
    /// `CheckpointFileLink` references.
    async fn list_checkpoint_ids(&self) -> Result<Vec<String>>;
}
