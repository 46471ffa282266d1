//! One typed repository trait per aggregate (spec §4.1: "no heterogeneous
//! containers — every repository is typed to its aggregate").
//!
//! Each trait is implemented twice: once over an in-memory map (`uow::memory`)
//! and once over a `sqlx::Transaction<'_, Sqlite>` (`uow::sql`), so a
//! `UnitOfWork` can hand out either without callers caring which.

pub mod blob_repository;
pub mod checkpoint_file_repository;
pub mod execution_repository;
pub mod file_commit_repository;
pub mod node_boundary_repository;
pub mod outbox_repository;
pub mod variant_repository;
pub mod workflow_repository;

pub use blob_repository::BlobRepository;
pub use checkpoint_file_repository::CheckpointFileRepository;
pub use execution_repository::ExecutionRepository;
pub use file_commit_repository::FileCommitRepository;
pub use node_boundary_repository::NodeBoundaryRepository;
pub use outbox_repository::OutboxRepository;
pub use variant_repository::VariantRepository;
pub use workflow_repository::WorkflowRepository;
