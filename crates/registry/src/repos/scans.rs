//! Scan history repository.

use crate::error::RegistryResult;
use crate::models::ScanEventRow;
use async_trait::async_trait;
use tally_core::ScanResult;
use time::OffsetDateTime;

/// Repository for scan counters and scan history.
#[async_trait]
pub trait ScanEventRepo: Send + Sync {
    /// Increment the entry's `total_scan_count`, set `last_scan_time = at` and
    /// append a `success` scan event in a single transaction.
    ///
    /// This is the only place scan counters change. The increment is an
    /// atomic `UPDATE ... + 1`, so concurrent calls for one code never lose
    /// updates.
    ///
    /// # Returns
    /// * `Ok(Some(count))` - the new `total_scan_count`
    /// * `Ok(None)` - no entry exists for the code; nothing was written
    /// * `Err(InvariantViolation)` - the update touched more than one row; rolled back
    async fn increment_counter_and_append_history(
        &self,
        code: &str,
        at: OffsetDateTime,
    ) -> RegistryResult<Option<i64>>;

    /// Append a scan event without touching counters.
    async fn append_scan_event(
        &self,
        code: &str,
        result: ScanResult,
        at: OffsetDateTime,
    ) -> RegistryResult<()>;

    /// Whether a `success` event for `code` exists strictly inside `(since, until)`.
    async fn recent_success_exists(
        &self,
        code: &str,
        since: OffsetDateTime,
        until: OffsetDateTime,
    ) -> RegistryResult<bool>;

    /// Newest scan events first, at most `limit`.
    async fn recent_events(&self, limit: u32) -> RegistryResult<Vec<ScanEventRow>>;
}
