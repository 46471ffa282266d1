//! The error taxonomy of spec §7.

use thiserror::Error;

use crate::domain::outbox::OutboxEvent;

/// Result alias used throughout `wf-core`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The closed error taxonomy of spec §7.
///
/// Naming deliberately avoids library-specific types at the public boundary
/// (no bare `sqlx::Error` leaking through call sites outside `uow`/
/// `repositories`), matching the no-library-specific-names requirement.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Identified entity missing; surfaced to the caller, never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-key or idempotency-key collision. Carries the winning row so
    /// the caller of an idempotent operation can recover it without a
    /// second round trip (see SPEC_FULL §11).
    #[error("conflict on {entity}: {reason}")]
    Conflict {
        entity: String,
        reason: String,
        existing: Option<Box<OutboxEvent>>,
    },

    /// Optimistic-concurrency failure. The coordinator may retry once, then
    /// surface.
    #[error("stale state for {0}")]
    StaleState(String),

    /// Malformed input: empty id, bad UUID in strict mode, oversize
    /// payload, missing required graph. Never retried.
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// I/O, network, or timeout against the checkpoint or file store.
    /// Retried by the processor up to `max_retries`.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// Hash mismatch, missing blob, invariant violation. Logged as
    /// critical, surfaced to the integrity report, never auto-retried.
    #[error("corrupt state: {0}")]
    CorruptState(String),

    /// An outbox event type has no registered handler.
    #[error("no handler for event type {0:?}")]
    NoHandler(crate::domain::outbox::OutboxEventType),

    /// The underlying relational store reported a failure not otherwise
    /// classified above.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem I/O failure from the file-tracking/cleanup services.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The checkpoint store collaborator (C5) failed.
    #[error("checkpoint store error: {0}")]
    CheckpointStore(#[from] wf_checkpoint::CheckpointError),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailure(msg.into())
    }
}
