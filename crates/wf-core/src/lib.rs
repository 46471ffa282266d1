//! Cross-store workflow execution coordination: a unit-of-work layer, an
//! outbox engine, and the services built on top of them (state adapter,
//! file tracking/cleanup, execution controller, batch coordinator, integrity
//! checker) that keep a primary relational store, an external checkpoint
//! store, and a content-addressed file store consistent with each other.

pub mod batch_coordinator;
pub mod cleanup;
pub mod config;
pub mod domain;
pub mod error;
pub mod execution_controller;
pub mod file_tracking;
pub mod integrity;
pub mod outbox;
pub mod repositories;
pub mod state_adapter;
pub mod uow;

pub use batch_coordinator::BatchExecutionCoordinator;
pub use cleanup::FileCleanupService;
pub use config::{Config, StorageMode};
pub use error::{CoreError, Result};
pub use execution_controller::ExecutionController;
pub use file_tracking::FileTrackingService;
pub use integrity::IntegrityChecker;
pub use outbox::OutboxProcessor;
pub use state_adapter::StateAdapter;
