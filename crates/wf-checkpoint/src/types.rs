//! Core data structures exchanged across the checkpoint store boundary.
//!
//! These types deliberately stay close to what `langgraph-checkpoint`'s
//! [`Checkpoint`]/[`CheckpointMetadata`] pair expresses, but are reshaped
//! around a single opaque `ExecutionState` snapshot rather than per-channel
//! values, since the store on this side of the boundary isn't a Pregel
//! graph engine — it is whatever external system the workflow runtime uses
//! to persist execution state (see spec §4.3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of an execution's state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExecutionState {
    /// The node the execution is currently positioned at, if any.
    pub current_node_id: Option<String>,
    /// Workflow-scoped variables visible to node implementations.
    pub workflow_variables: HashMap<String, serde_json::Value>,
    /// Ordered sequence of node ids the execution has passed through.
    pub execution_path: Vec<String>,
    /// Per-node results accumulated so far.
    pub node_results: HashMap<String, serde_json::Value>,
}

impl ExecutionState {
    /// An empty state, as used when a session is first initialized.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Shallow-merge `other` into `self`, with `other`'s keys winning.
    ///
    /// Used by `fork` (spec §4.6): `new_state` is merged key-by-key over the
    /// checkpoint's restored state.
    pub fn merged_with(&self, other: &HashMap<String, serde_json::Value>) -> Self {
        let mut merged = self.clone();
        for (k, v) in other {
            merged.workflow_variables.insert(k.clone(), v.clone());
        }
        merged
    }
}

/// Reason a checkpoint was written, mirroring spec §4.3's trigger column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SaveTrigger {
    Auto,
    NodeEntry,
    NodeExit,
    UserRequest,
    ToolCall,
}

/// A single persisted checkpoint as returned by the external store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Opaque identity assigned by the store.
    pub id: String,
    /// Monotonically increasing sequence number assigned at creation time.
    /// Opaque ids aren't guaranteed to sort the way callers expect, so the
    /// store keeps this alongside `id` purely to implement the "greater
    /// checkpoint id wins" tie-break in spec §4.3.
    pub seq: i64,
    /// The session this checkpoint belongs to.
    pub session_id: i64,
    /// The state captured at this checkpoint.
    pub state: ExecutionState,
    /// The node active when this checkpoint was taken, if any.
    pub node_id: Option<String>,
    /// Why the checkpoint was written.
    pub trigger: SaveTrigger,
    /// Optional human-assigned name.
    pub name: Option<String>,
    /// Free-form metadata, including the tool-track ordinal under the
    /// reserved key `"_tool_track_ordinal"`.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Monotonic ordinal ordering fine-grained sub-actions within a node
    /// (the "tool-track ordinal" of the glossary).
    pub tool_track_ordinal: i64,
    pub created_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Tie-break key used by rollback when multiple checkpoints share a
    /// tool-track ordinal: the one with the greater checkpoint id wins
    /// (spec §4.3), approximated here by `seq` since ids are opaque.
    pub fn tie_break_key(&self) -> (i64, i64) {
        (self.tool_track_ordinal, self.seq)
    }
}
