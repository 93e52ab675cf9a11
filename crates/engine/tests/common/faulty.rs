//! Registry store wrapper with switchable failures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tally_core::ScanResult;
use tally_registry::{
    ClearStats, CodeRepo, CodeRow, IngestBatch, IngestionRepo, IngestionRow, RegistryError,
    RegistryResult, RegistryStats, RegistryStore, ScanEventRepo, ScanEventRow,
};
use time::OffsetDateTime;

/// Delegates to a real store unless a fault switch is on.
pub struct FaultyStore {
    inner: Arc<dyn RegistryStore>,
    /// `increment_counter_and_append_history` fails with a database error.
    pub fail_increment: AtomicBool,
    /// `increment_counter_and_append_history` hangs far past any timeout.
    pub stall_increment: AtomicBool,
    /// `increment_counter_and_append_history` reports two rows for the code.
    pub corrupt_increment: AtomicBool,
    /// `list_codes` fails.
    pub fail_list_codes: AtomicBool,
    /// `bulk_upsert` fails.
    pub fail_bulk_upsert: AtomicBool,
    /// Number of `list_codes` calls that reached the inner store.
    pub list_codes_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn RegistryStore>) -> Self {
        Self {
            inner,
            fail_increment: AtomicBool::new(false),
            stall_increment: AtomicBool::new(false),
            corrupt_increment: AtomicBool::new(false),
            fail_list_codes: AtomicBool::new(false),
            fail_bulk_upsert: AtomicBool::new(false),
            list_codes_calls: AtomicUsize::new(0),
        }
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    fn unavailable(op: &str) -> RegistryError {
        RegistryError::Io(std::io::Error::other(format!("injected failure in {op}")))
    }
}

#[async_trait]
impl CodeRepo for FaultyStore {
    async fn find_by_code(&self, code: &str) -> RegistryResult<Option<CodeRow>> {
        self.inner.find_by_code(code).await
    }

    async fn find_codes_batch(&self, codes: &[String]) -> RegistryResult<HashMap<String, CodeRow>> {
        self.inner.find_codes_batch(codes).await
    }

    async fn list_codes(&self) -> RegistryResult<Vec<String>> {
        if self.fail_list_codes.load(Ordering::SeqCst) {
            return Err(Self::unavailable("list_codes"));
        }
        self.list_codes_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_codes().await
    }

    async fn list_entries(&self, limit: u32) -> RegistryResult<Vec<CodeRow>> {
        self.inner.list_entries(limit).await
    }

    async fn list_entries_between(
        &self,
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
    ) -> RegistryResult<Vec<CodeRow>> {
        self.inner.list_entries_between(start, end).await
    }

    async fn upsert_entry(
        &self,
        code: &str,
        batch_id: &str,
        at: OffsetDateTime,
    ) -> RegistryResult<CodeRow> {
        self.inner.upsert_entry(code, batch_id, at).await
    }

    async fn delete_entry(&self, code: &str) -> RegistryResult<()> {
        self.inner.delete_entry(code).await
    }

    async fn count_codes(&self) -> RegistryResult<u64> {
        self.inner.count_codes().await
    }
}

#[async_trait]
impl IngestionRepo for FaultyStore {
    async fn bulk_upsert(&self, batch: &IngestBatch) -> RegistryResult<()> {
        if self.fail_bulk_upsert.load(Ordering::SeqCst) {
            return Err(Self::unavailable("bulk_upsert"));
        }
        self.inner.bulk_upsert(batch).await
    }

    async fn list_ingestions(&self, code: &str) -> RegistryResult<Vec<IngestionRow>> {
        self.inner.list_ingestions(code).await
    }
}

#[async_trait]
impl ScanEventRepo for FaultyStore {
    async fn increment_counter_and_append_history(
        &self,
        code: &str,
        at: OffsetDateTime,
    ) -> RegistryResult<Option<i64>> {
        if self.fail_increment.load(Ordering::SeqCst) {
            return Err(Self::unavailable("increment_counter_and_append_history"));
        }
        if self.corrupt_increment.load(Ordering::SeqCst) {
            return Err(RegistryError::InvariantViolation(format!(
                "increment for code '{code}' touched 2 rows"
            )));
        }
        if self.stall_increment.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.inner.increment_counter_and_append_history(code, at).await
    }

    async fn append_scan_event(
        &self,
        code: &str,
        result: ScanResult,
        at: OffsetDateTime,
    ) -> RegistryResult<()> {
        self.inner.append_scan_event(code, result, at).await
    }

    async fn recent_success_exists(
        &self,
        code: &str,
        since: OffsetDateTime,
        until: OffsetDateTime,
    ) -> RegistryResult<bool> {
        self.inner.recent_success_exists(code, since, until).await
    }

    async fn recent_events(&self, limit: u32) -> RegistryResult<Vec<ScanEventRow>> {
        self.inner.recent_events(limit).await
    }
}

#[async_trait]
impl RegistryStore for FaultyStore {
    async fn migrate(&self) -> RegistryResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> RegistryResult<()> {
        self.inner.health_check().await
    }

    async fn delete_all(&self) -> RegistryResult<ClearStats> {
        self.inner.delete_all().await
    }

    async fn stats(&self) -> RegistryResult<RegistryStats> {
        self.inner.stats().await
    }
}
