//! Explicit configuration, passed into constructors.
//!
//! Per spec §9's first REDESIGN FLAG: the source's lazily-initialized
//! process-wide configuration singleton is replaced with a plain struct
//! constructed once at bootstrap and threaded explicitly. Tests build a
//! fresh [`Config`] (via [`Config::default`] plus builder overrides) instead
//! of mutating ambient global state.

use std::time::Duration;

/// Storage backend selection for the unit of work (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Hash-map backed, for tests and local development.
    InMemory,
    /// SQLite-backed via `sqlx`.
    Sql,
}

/// Process-wide configuration for a coordinator instance.
///
/// Every recognized option from spec §6 is represented. There is no global
/// registry of these; callers construct one and pass it (or the pieces they
/// need) into `UnitOfWorkFactory`, `StateAdapter`, `OutboxProcessor`, etc.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_mode: StorageMode,
    pub primary_db_url: String,
    pub checkpoint_store_url: Option<String>,
    pub file_store_root: std::path::PathBuf,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_retention_days: i64,
    pub outbox_max_retries: u32,
    pub outbox_strict_verification: bool,
    /// How long an event may sit `PROCESSING` before the recovery pass in
    /// `OutboxProcessor::start` treats it as abandoned by a crashed
    /// processor and resets it to `PENDING` (spec §4.5/§4.8).
    pub outbox_stuck_after: chrono::Duration,
    pub cleanup_max_files: usize,
    /// Deduplication window for idempotency keys. Spec §9's open question
    /// defaults this to `outbox_retention_days`, made independently
    /// configurable here.
    pub idempotency_window: chrono::Duration,
}

impl Default for Config {
    fn default() -> Self {
        let outbox_retention_days = 7;
        Self {
            storage_mode: StorageMode::InMemory,
            primary_db_url: "sqlite::memory:".to_string(),
            checkpoint_store_url: None,
            file_store_root: std::path::PathBuf::from("."),
            outbox_poll_interval: Duration::from_secs(1),
            outbox_batch_size: 50,
            outbox_retention_days,
            outbox_max_retries: 5,
            outbox_strict_verification: false,
            outbox_stuck_after: chrono::Duration::minutes(5),
            cleanup_max_files: 100,
            idempotency_window: chrono::Duration::days(outbox_retention_days),
        }
    }
}

impl Config {
    pub fn with_storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    pub fn with_primary_db_url(mut self, url: impl Into<String>) -> Self {
        self.primary_db_url = url.into();
        self
    }

    pub fn with_file_store_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.file_store_root = root.into();
        self
    }

    pub fn with_outbox_poll_interval(mut self, interval: Duration) -> Self {
        self.outbox_poll_interval = interval;
        self
    }

    pub fn with_outbox_batch_size(mut self, size: usize) -> Self {
        self.outbox_batch_size = size;
        self
    }

    pub fn with_outbox_max_retries(mut self, retries: u32) -> Self {
        self.outbox_max_retries = retries;
        self
    }

    pub fn with_cleanup_max_files(mut self, max_files: usize) -> Self {
        self.cleanup_max_files = max_files;
        self
    }

    pub fn with_outbox_stuck_after(mut self, stuck_after: chrono::Duration) -> Self {
        self.outbox_stuck_after = stuck_after;
        self
    }
}
