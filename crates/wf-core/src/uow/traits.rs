//! The unit-of-work abstraction (spec §4.1).
//!
//! A `UnitOfWork` is a single transactional scope over every typed
//! repository. Callers obtain one from a [`UnitOfWorkFactory`], do their
//! reads/writes through the repository accessors, then call exactly one of
//! `commit`/`rollback` — both consume the box, so a unit of work cannot be
//! entered twice (spec §4.1's "entering twice is forbidden").

use async_trait::async_trait;

use crate::error::Result;
use crate::repositories::{
    BlobRepository, CheckpointFileRepository, ExecutionRepository, FileCommitRepository,
    NodeBoundaryRepository, OutboxRepository, VariantRepository, WorkflowRepository,
};

/// A transactional scope spanning every repository.
///
/// Implementations (`uow::memory::InMemoryUnitOfWork`, `uow::sql::SqlUnitOfWork`)
/// implement every `*Repository` trait on themselves and hand back `self` as
/// the trait object from each accessor, so there is exactly one mutable
/// staging area per unit of work rather than one per aggregate.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;

    fn executions(&mut self) -> &mut dyn ExecutionRepository;
    fn workflows(&mut self) -> &mut dyn WorkflowRepository;
    fn variants(&mut self) -> &mut dyn VariantRepository;
    fn outbox(&mut self) -> &mut dyn OutboxRepository;
    fn checkpoint_files(&mut self) -> &mut dyn CheckpointFileRepository;
    fn file_commits(&mut self) -> &mut dyn FileCommitRepository;
    fn blobs(&mut self) -> &mut dyn BlobRepository;
    fn node_boundaries(&mut self) -> &mut dyn NodeBoundaryRepository;
}

/// Opens fresh [`UnitOfWork`] instances against a configured backend.
#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}
