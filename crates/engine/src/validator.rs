//! Scan validation and registry maintenance.
//!
//! A scan passes through three gates before it is counted:
//!
//! 1. The debounce guard rejects fast repeats of the same code in-process.
//! 2. The existence cache rejects codes that are not registered; those
//!    attempts are still recorded as `unknown` scan events.
//! 3. The scan history rejects a code that already has a successful scan
//!    within the duplicate window.
//!
//! Only then is the counter incremented and the success event appended, in
//! a single store transaction.

use crate::cache::{CacheStatus, ExistenceCache};
use crate::debounce::{Admission, DebounceGuard};
use crate::error::{EngineError, EngineResult, bounded};
use crate::ingest::{IngestPlan, IngestReport, distinct_codes};
use crate::locks::CodeLocks;
use crate::metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tally_core::config::EngineConfig;
use tally_core::{Clock, Code, ScanResult, ScanTime};
use tally_registry::{
    ClearStats, CodeRow, IngestBatch, IngestionRow, RegistryStats, RegistryStore, ScanEventRow,
};
use time::{OffsetDateTime, UtcOffset};

/// Classification of a scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    /// Counted.
    Success,
    /// Suppressed repeat; nothing was written.
    Duplicate,
    /// Not a registered code; recorded as an `unknown` scan event.
    Unknown,
}

impl ScanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Duplicate => "duplicate",
            Self::Unknown => "unknown",
        }
    }
}

/// Result of [`ScanValidator::validate_scan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    pub code: String,
    pub kind: ScanKind,
    /// The code's `total_scan_count` after a successful scan.
    pub count: Option<i64>,
    pub message: String,
}

impl ScanOutcome {
    fn success(code: &Code, count: i64) -> Self {
        Self {
            code: code.to_string(),
            kind: ScanKind::Success,
            count: Some(count),
            message: "receipt confirmed".to_string(),
        }
    }

    fn rapid_repeat(code: &Code) -> Self {
        Self {
            code: code.to_string(),
            kind: ScanKind::Duplicate,
            count: None,
            message: "scanned too fast, wait a moment and retry".to_string(),
        }
    }

    fn duplicate(code: &Code) -> Self {
        Self {
            code: code.to_string(),
            kind: ScanKind::Duplicate,
            count: None,
            message: "duplicate scan".to_string(),
        }
    }

    fn unknown(code: &Code) -> Self {
        Self {
            code: code.to_string(),
            kind: ScanKind::Unknown,
            count: None,
            message: "not a tracked item".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == ScanKind::Success
    }
}

/// Validates scans against the registry and maintains it.
pub struct ScanValidator {
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    cache: ExistenceCache,
    debounce: DebounceGuard,
    in_flight: CodeLocks,
    duplicate_window: Duration,
    store_timeout: Duration,
    offset: UtcOffset,
}

impl ScanValidator {
    /// Build a validator over `store`.
    ///
    /// The existence cache starts empty and stale; the first lookup loads it.
    pub fn new(
        store: Arc<dyn RegistryStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        let offset = config.utc_offset()?;

        metrics::register_metrics();

        Ok(Self {
            cache: ExistenceCache::new(
                store.clone(),
                clock.clone(),
                config.cache_ttl(),
                config.store_timeout(),
            ),
            debounce: DebounceGuard::new(config.fast_reject_window(), config.ledger_horizon()),
            in_flight: CodeLocks::default(),
            store,
            clock,
            duplicate_window: config.duplicate_window(),
            store_timeout: config.store_timeout(),
            offset,
        })
    }

    /// Current reading of the validator's clock.
    pub fn now(&self) -> ScanTime {
        self.clock.now()
    }

    fn wall(&self, now: ScanTime) -> OffsetDateTime {
        now.wall.to_offset(self.offset)
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Validate one scan attempt taken at `now`.
    ///
    /// Duplicate and unknown scans are returned as outcomes. Errors mean the
    /// attempt could not be classified; the debounce ledger is restored so an
    /// immediate retry is judged as if the failed attempt never happened.
    pub async fn validate_scan(&self, raw: &str, now: ScanTime) -> EngineResult<ScanOutcome> {
        let code = Code::parse(raw)?;

        let admission = self.debounce.admit(code.as_str(), now.monotonic);
        if !admission.is_admitted() {
            tracing::debug!(
                code = %code,
                since_previous = ?admission.since_previous(),
                "rapid repeat suppressed"
            );
            metrics::record_scan_outcome(ScanKind::Duplicate.as_str());
            return Ok(ScanOutcome::rapid_repeat(&code));
        }

        match self.classify_admitted(&code, now).await {
            Ok(outcome) => {
                metrics::record_scan_outcome(outcome.kind.as_str());
                Ok(outcome)
            }
            Err(err) => {
                self.rollback(&admission, &code, &err);
                Err(err)
            }
        }
    }

    /// Validate one scan attempt at the validator clock's current time.
    pub async fn scan(&self, raw: &str) -> EngineResult<ScanOutcome> {
        self.validate_scan(raw, self.clock.now()).await
    }

    async fn classify_admitted(&self, code: &Code, now: ScanTime) -> EngineResult<ScanOutcome> {
        let at = self.wall(now);

        if !self.cache.contains(code.as_str()).await? {
            self.record_unknown(code, at).await?;
            return Ok(ScanOutcome::unknown(code));
        }

        // Held until the success is recorded, so a concurrent attempt for
        // the same code sees it in the window.
        let _in_flight = self.in_flight.lock(code.as_str()).await;

        let since = at - self.duplicate_window;
        let until = at + self.duplicate_window;
        let recent = bounded(
            "recent_success_exists",
            self.store_timeout,
            self.store.recent_success_exists(code.as_str(), since, until),
        )
        .await?;
        if recent {
            tracing::debug!(code = %code, "duplicate scan within window");
            return Ok(ScanOutcome::duplicate(code));
        }

        let count = bounded(
            "increment_counter_and_append_history",
            self.store_timeout,
            self.store
                .increment_counter_and_append_history(code.as_str(), at),
        )
        .await?;

        match count {
            Some(count) => {
                tracing::info!(code = %code, count, "scan recorded");
                Ok(ScanOutcome::success(code, count))
            }
            None => {
                // Deleted by another process after the cache was loaded.
                tracing::info!(code = %code, "cached code no longer registered");
                self.cache.remove(code.as_str()).await;
                self.record_unknown(code, at).await?;
                Ok(ScanOutcome::unknown(code))
            }
        }
    }

    async fn record_unknown(&self, code: &Code, at: OffsetDateTime) -> EngineResult<()> {
        bounded(
            "append_scan_event",
            self.store_timeout,
            self.store
                .append_scan_event(code.as_str(), ScanResult::Unknown, at),
        )
        .await?;
        tracing::info!(code = %code, "unknown code scanned");
        Ok(())
    }

    fn rollback(&self, admission: &Admission, code: &Code, err: &EngineError) {
        self.debounce.rollback(admission);
        metrics::record_scan_error(err.code());
        match err {
            EngineError::InvariantViolation(msg) => {
                tracing::error!(code = %code, error = %msg, "registry invariant violated during scan");
            }
            other => {
                tracing::warn!(code = %code, error = %other, "scan failed; debounce entry rolled back");
            }
        }
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Ingest a batch of codes as one atomic write.
    ///
    /// Blank entries are dropped. Codes are classified against the registry
    /// as it was before the write; repeats inside the batch count as known.
    pub async fn ingest_codes<I, S>(
        &self,
        raw: I,
        batch_id: &str,
        now: ScanTime,
    ) -> EngineResult<IngestReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes = Code::parse_batch(raw)?;
        if codes.is_empty() {
            return Ok(IngestPlan::default().into_report(batch_id));
        }

        let registered = bounded(
            "find_codes_batch",
            self.store_timeout,
            self.store.find_codes_batch(&distinct_codes(&codes)),
        )
        .await?;
        let plan = IngestPlan::classify(codes, |code| registered.contains_key(code));

        let batch = IngestBatch {
            batch_id: batch_id.to_string(),
            ingested_at: self.wall(now),
            codes: plan.codes.clone(),
        };
        bounded("bulk_upsert", self.store_timeout, self.store.bulk_upsert(&batch)).await?;

        // Known codes too: another process may have registered them after
        // this cache was loaded.
        self.cache.extend(plan.codes.iter().cloned()).await;

        let report = plan.into_report(batch_id);
        metrics::record_ingested(report.new_count, report.known_count);
        tracing::info!(
            batch_id,
            new = report.new_count,
            known = report.known_count,
            "batch ingested"
        );
        Ok(report)
    }

    /// Register (or re-ingest) a single code.
    pub async fn add_code(&self, raw: &str, batch_id: &str, now: ScanTime) -> EngineResult<CodeRow> {
        let code = Code::parse(raw)?;
        let row = bounded(
            "upsert_entry",
            self.store_timeout,
            self.store
                .upsert_entry(code.as_str(), batch_id, self.wall(now)),
        )
        .await?;

        self.cache.insert(code.as_str()).await;

        let new = row.total_upload_count == 1;
        metrics::record_ingested(usize::from(new), usize::from(!new));
        tracing::info!(code = %code, batch_id, uploads = row.total_upload_count, "code added");
        Ok(row)
    }

    /// Delete one registry entry. History stays.
    pub async fn remove_code(&self, raw: &str) -> EngineResult<()> {
        let code = Code::parse(raw)?;
        let deleted = bounded(
            "delete_entry",
            self.store_timeout,
            self.store.delete_entry(code.as_str()),
        )
        .await;
        if matches!(deleted, Ok(()) | Err(EngineError::NotFound(_))) {
            self.cache.remove(code.as_str()).await;
        }
        deleted?;
        tracing::info!(code = %code, "code removed");
        Ok(())
    }

    /// Wipe the registry, both logs, the cache and the debounce ledger.
    pub async fn clear_all(&self) -> EngineResult<ClearStats> {
        let cleared = bounded("delete_all", self.store_timeout, self.store.delete_all()).await?;
        self.cache.clear().await;
        self.debounce.clear();
        tracing::warn!(
            codes = cleared.codes,
            ingestion_records = cleared.ingestion_records,
            scan_events = cleared.scan_events,
            "registry cleared"
        );
        Ok(cleared)
    }

    // =========================================================================
    // Cache control
    // =========================================================================

    /// Rebuild the existence cache now. Returns the number of codes loaded.
    pub async fn force_cache_reload(&self) -> EngineResult<usize> {
        self.cache.force_reload().await
    }

    pub async fn cache_status(&self) -> CacheStatus {
        self.cache.status().await
    }

    /// Number of codes held in the debounce ledger.
    pub fn debounce_len(&self) -> usize {
        self.debounce.len()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Look up several codes at once. Input is trimmed and de-duplicated;
    /// found entries come back in input order.
    pub async fn search_codes<I, S>(&self, raw: I) -> EngineResult<Vec<CodeRow>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted = distinct_codes(&Code::parse_batch(raw)?);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut found = bounded(
            "find_codes_batch",
            self.store_timeout,
            self.store.find_codes_batch(&wanted),
        )
        .await?;
        Ok(wanted
            .iter()
            .filter_map(|code| found.remove(code))
            .collect())
    }

    /// Most recently created entries, at most `limit`.
    pub async fn list_entries(&self, limit: u32) -> EngineResult<Vec<CodeRow>> {
        bounded(
            "list_entries",
            self.store_timeout,
            self.store.list_entries(limit),
        )
        .await
    }

    /// Entries first seen within the inclusive range, newest first.
    pub async fn list_entries_between(
        &self,
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
    ) -> EngineResult<Vec<CodeRow>> {
        bounded(
            "list_entries_between",
            self.store_timeout,
            self.store.list_entries_between(start, end),
        )
        .await
    }

    /// Newest scan events first, at most `limit`.
    pub async fn recent_events(&self, limit: u32) -> EngineResult<Vec<ScanEventRow>> {
        bounded(
            "recent_events",
            self.store_timeout,
            self.store.recent_events(limit),
        )
        .await
    }

    /// Ingestion records of one code, oldest first.
    pub async fn ingestion_history(&self, raw: &str) -> EngineResult<Vec<IngestionRow>> {
        let code = Code::parse(raw)?;
        bounded(
            "list_ingestions",
            self.store_timeout,
            self.store.list_ingestions(code.as_str()),
        )
        .await
    }

    /// One registry entry, if present.
    pub async fn find_code(&self, raw: &str) -> EngineResult<Option<CodeRow>> {
        let code = Code::parse(raw)?;
        bounded(
            "find_by_code",
            self.store_timeout,
            self.store.find_by_code(code.as_str()),
        )
        .await
    }

    pub async fn stats(&self) -> EngineResult<RegistryStats> {
        bounded("stats", self.store_timeout, self.store.stats()).await
    }
}
