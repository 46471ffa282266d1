//! Workflow definitions and their node variants (spec §3, C1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A versioned workflow definition.
///
/// The graph itself (node/edge topology, the "graph factory" of spec §3) is
/// out of this system's scope — compiled and executed elsewhere. `wf-core`
/// only needs enough of the definition to validate that a node id referenced
/// by an execution or a variant actually belongs to this workflow, so the
/// topology is kept opaque as `definition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Opaque graph definition, round-tripped but never interpreted here.
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            definition: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }
}

/// A compiled, executable form of a [`Workflow`]'s graph. The compiler that
/// produces one is an out-of-scope collaborator (spec §1); `wf-core` never
/// interprets the graph itself, it only needs to know whether the caller
/// handed one over before continuing an execution, since continuing without
/// one would produce an execution nothing can schedule (spec §4.7).
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pub workflow_id: String,
}

impl CompiledGraph {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
        }
    }
}

/// One of possibly several variants of a node's content within a workflow
/// (A/B test arms, spec's "batch" terminology). Exactly one variant per
/// `(workflow_id, node_id)` is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeVariant {
    pub id: String,
    pub workflow_id: String,
    pub node_id: String,
    pub label: String,
    pub content: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl NodeVariant {
    pub fn new(
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        node_id: impl Into<String>,
        label: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            node_id: node_id.into(),
            label: label.into(),
            content,
            is_active: false,
            created_at: Utc::now(),
        }
    }
}
