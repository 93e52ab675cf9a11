//! Registry entry repository.

use crate::error::RegistryResult;
use crate::models::CodeRow;
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;

/// Repository for registry entries.
#[async_trait]
pub trait CodeRepo: Send + Sync {
    /// Look up one entry.
    ///
    /// Returns `InvariantViolation` if more than one row exists for the code.
    async fn find_by_code(&self, code: &str) -> RegistryResult<Option<CodeRow>>;

    /// Look up many entries in as few queries as possible.
    ///
    /// Codes without an entry are simply absent from the result.
    async fn find_codes_batch(&self, codes: &[String]) -> RegistryResult<HashMap<String, CodeRow>>;

    /// Every registered code. Used to rebuild the existence cache.
    async fn list_codes(&self) -> RegistryResult<Vec<String>>;

    /// Most recently created entries first, at most `limit`.
    async fn list_entries(&self, limit: u32) -> RegistryResult<Vec<CodeRow>>;

    /// Entries whose `first_seen_time` falls within the (inclusive) bounds, newest first.
    async fn list_entries_between(
        &self,
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
    ) -> RegistryResult<Vec<CodeRow>>;

    /// Ingest a single code: create the entry (upload count 1) or bump its
    /// upload count and `last_seen_time`, and append an ingestion record,
    /// all in one transaction. Returns the entry after the write.
    async fn upsert_entry(
        &self,
        code: &str,
        batch_id: &str,
        at: OffsetDateTime,
    ) -> RegistryResult<CodeRow>;

    /// Delete one entry. `NotFound` if it does not exist.
    async fn delete_entry(&self, code: &str) -> RegistryResult<()>;

    /// Number of entries.
    async fn count_codes(&self) -> RegistryResult<u64>;
}
