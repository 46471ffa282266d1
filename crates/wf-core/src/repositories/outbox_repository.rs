use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::OutboxEvent;
use crate::error::Result;

/// Repository over the outbox log (spec §4.2, §6).
///
/// `claim_pending`/`get_failed_for_retry` both order by `created_at`
/// ascending so the processor drains events in the order they were written
/// (spec P3).
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Inserts a new event and returns it with its assigned id. Returns
    /// [`crate::error::CoreError::Conflict`] carrying the existing row when
    /// `idempotency_key` collides with a non-expired prior event.
    async fn add(&mut self, event: OutboxEvent) -> Result<OutboxEvent>;

    async fn get_by_id(&mut self, id: i64) -> Result<OutboxEvent>;

    async fn find_by_idempotency_key(&mut self, key: &str) -> Result<Option<OutboxEvent>>;

    /// Claims up to `limit` `PENDING` events by flipping them to
    /// `PROCESSING` and returns the claimed rows. Under the SQL backend this
    /// is a single conditional `UPDATE ... WHERE status = 'PENDING'`
    /// followed by a `SELECT`, so two processors racing the same table never
    /// claim the same row twice.
    async fn claim_pending(&mut self, limit: usize) -> Result<Vec<OutboxEvent>>;

    async fn get_failed_for_retry(&mut self, limit: usize) -> Result<Vec<OutboxEvent>>;

    async fn update(&mut self, event: OutboxEvent) -> Result<()>;

    /// Deletes `PROCESSED` events older than `before`, capped at `limit` per
    /// call (spec §4.2's garbage collection).
    async fn delete_processed(&mut self, before: DateTime<Utc>, limit: usize) -> Result<u64>;

    /// Rows stuck in `PROCESSING` past `stuck_after` — the processor treats
    /// these as crashed mid-dispatch and resets them to `PENDING`.
    async fn find_stuck_processing(&mut self, stuck_after: DateTime<Utc>) -> Result<Vec<OutboxEvent>>;
}
