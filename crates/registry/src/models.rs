//! Database models mapping to the registry schema.

use serde::Serialize;
use sqlx::FromRow;
use tally_core::ScanResult;
use time::OffsetDateTime;

// =============================================================================
// Registry entries
// =============================================================================

/// Aggregate record for one tracked code.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CodeRow {
    pub code: String,
    /// Successful validations so far. Only ever increases.
    pub total_scan_count: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_scan_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_time: OffsetDateTime,
    /// Number of ingestions of this code (>= 1 once created).
    pub total_upload_count: i64,
}

// =============================================================================
// Ingestion log
// =============================================================================

/// One ingestion of a code. Append-only.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct IngestionRow {
    pub ingestion_id: i64,
    pub code: String,
    #[serde(with = "time::serde::rfc3339")]
    pub ingested_at: OffsetDateTime,
    pub batch_id: String,
}

/// A batch of codes to upsert together.
///
/// `codes` is in processing order and may contain repeats; each occurrence
/// bumps the upload count and produces its own ingestion record.
#[derive(Debug, Clone)]
pub struct IngestBatch {
    pub batch_id: String,
    pub ingested_at: OffsetDateTime,
    pub codes: Vec<String>,
}

// =============================================================================
// Scan history
// =============================================================================

/// One validation attempt that reached the registry. Append-only.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScanEventRow {
    pub event_id: i64,
    pub code: String,
    pub outcome: String,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl ScanEventRow {
    /// Parsed outcome.
    pub fn result(&self) -> tally_core::Result<ScanResult> {
        self.outcome.parse()
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Registry-wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of registry entries.
    pub total_codes: u64,
    /// Distinct codes with at least one successful scan.
    pub scanned_codes: u64,
    /// Number of successful scan events.
    pub successful_scans: u64,
    /// Number of scan events for unregistered codes.
    pub failed_scans: u64,
}

/// Rows removed by a full clear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearStats {
    pub codes: u64,
    pub ingestion_records: u64,
    pub scan_events: u64,
}
