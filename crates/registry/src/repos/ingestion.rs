//! Ingestion repository.

use crate::error::RegistryResult;
use crate::models::{IngestBatch, IngestionRow};
use async_trait::async_trait;

/// Repository for bulk ingestion and its audit log.
#[async_trait]
pub trait IngestionRepo: Send + Sync {
    /// Upsert every code of the batch and append one ingestion record per
    /// occurrence, atomically.
    ///
    /// All writes succeed or none are visible.
    async fn bulk_upsert(&self, batch: &IngestBatch) -> RegistryResult<()>;

    /// Ingestion records of one code, oldest first.
    async fn list_ingestions(&self, code: &str) -> RegistryResult<Vec<IngestionRow>>;
}
