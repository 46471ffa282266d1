//! Checkpoint trait abstraction and in-memory reference implementation.
//!
//! This crate is the anti-corruption boundary spec §4.3 calls the "state
//! adapter"'s collaborator: the external checkpoint store. It is deliberately
//! small — a trait plus one reference backend — because the real external
//! store (spec §1, "Explicitly out of scope") is somebody else's system.
//! `wf-core::state_adapter::StateAdapter` is built against [`CheckpointStore`]
//! and works with any implementation, including the in-memory one here for
//! tests.

mod error;
mod memory;
mod traits;
mod types;

pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use traits::CheckpointStore;
pub use types::{CheckpointRecord, ExecutionState, SaveTrigger};
