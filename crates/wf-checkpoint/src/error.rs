//! Error type for the external checkpoint store boundary.

use thiserror::Error;

/// Errors surfaced across the [`crate::traits::CheckpointStore`] boundary.
///
/// This mirrors the subset of the core error taxonomy that is relevant to a
/// checkpoint store collaborator: callers on the `wf-core` side translate
/// these into the broader `CoreError` taxonomy (see `wf_core::error`).
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The referenced checkpoint or session does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store rejected the operation because the input was malformed.
    #[error("invalid checkpoint request: {0}")]
    InvalidRequest(String),

    /// A transient failure talking to the backing store (network, I/O, lock
    /// contention). Callers may retry.
    #[error("transient checkpoint store error: {0}")]
    Transient(String),

    /// Serialization of the execution state failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result alias for checkpoint store operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;
