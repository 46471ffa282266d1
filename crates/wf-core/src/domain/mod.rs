//! The data model of spec §3: one module per aggregate.

pub mod checkpoint_file;
pub mod execution;
pub mod file_commit;
pub mod integrity;
pub mod node_boundary;
pub mod outbox;
pub mod workflow;

pub use checkpoint_file::CheckpointFileLink;
pub use execution::{Execution, ExecutionStatus};
pub use file_commit::{Blob, FileCommit, FileEntry};
pub use integrity::{IntegrityIssue, IntegrityReport, IssueType, Severity};
pub use node_boundary::{BoundaryStatus, NodeBoundary};
pub use outbox::{OutboxEvent, OutboxEventType, OutboxStatus};
pub use workflow::{CompiledGraph, NodeVariant, Workflow};
