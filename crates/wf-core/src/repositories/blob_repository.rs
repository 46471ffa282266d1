use async_trait::async_trait;

use crate::domain::Blob;
use crate::error::Result;

/// Repository over content-addressed blobs (spec C6's "insert if absent").
#[async_trait]
pub trait BlobRepository: Send + Sync {
    /// No-op if `blob.hash` already exists.
    async fn put_if_absent(&mut self, blob: Blob) -> Result<()>;
    async fn get_by_hash(&mut self, hash: &str) -> Result<Option<Blob>>;
    async fn exists(&mut self, hash: &str) -> Result<bool>;
}
