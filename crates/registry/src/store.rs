//! Registry store trait and the SQLite implementation.

use crate::error::{RegistryError, RegistryResult};
use crate::models::{ClearStats, RegistryStats};
use crate::repos::{CodeRepo, IngestionRepo, ScanEventRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined registry store trait.
#[async_trait]
pub trait RegistryStore: CodeRepo + IngestionRepo + ScanEventRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> RegistryResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> RegistryResult<()>;

    /// Delete every entry, ingestion record and scan event in one transaction.
    async fn delete_all(&self) -> RegistryResult<ClearStats>;

    /// Registry-wide statistics.
    async fn stats(&self) -> RegistryResult<RegistryStats>;
}

/// SQLite-based registry store.
///
/// Timestamps are stored as RFC 3339 text and compared through `julianday()`,
/// so rows written with different offsets still order correctly.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> RegistryResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(30);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // One connection: SQLite serializes writers anyway, and a single
        // connection keeps concurrent increments from hitting SQLITE_BUSY.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::warn!(
            query_timeout_secs,
            path = %path.display(),
            "SQLite query timeout is advisory only; use PostgreSQL when several \
             validator instances share one registry"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl RegistryStore for SqliteStore {
    async fn migrate(&self) -> RegistryResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> RegistryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_all(&self) -> RegistryResult<ClearStats> {
        let mut tx = self.pool.begin().await?;

        let scan_events = sqlx::query("DELETE FROM scan_events")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let ingestion_records = sqlx::query("DELETE FROM ingestion_records")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let codes = sqlx::query("DELETE FROM codes")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(ClearStats {
            codes,
            ingestion_records,
            scan_events,
        })
    }

    async fn stats(&self) -> RegistryResult<RegistryStats> {
        let (total_codes, scanned_codes, successful_scans, failed_scans): (i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM codes),
                    (SELECT COUNT(DISTINCT code) FROM scan_events WHERE outcome = 'success'),
                    (SELECT COUNT(*) FROM scan_events WHERE outcome = 'success'),
                    (SELECT COUNT(*) FROM scan_events WHERE outcome = 'unknown')
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(RegistryStats {
            total_codes: total_codes as u64,
            scanned_codes: scanned_codes as u64,
            successful_scans: successful_scans as u64,
            failed_scans: failed_scans as u64,
        })
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use std::collections::HashMap;
    use tally_core::ScanResult;
    use time::OffsetDateTime;

    const UPSERT_ENTRY_SQL: &str = r#"
        INSERT INTO codes (code, total_scan_count, last_scan_time, first_seen_time, last_seen_time, total_upload_count)
        VALUES (?, 0, NULL, ?, ?, 1)
        ON CONFLICT(code) DO UPDATE SET
            total_upload_count = codes.total_upload_count + 1,
            last_seen_time = excluded.last_seen_time
        RETURNING *
    "#;

    const INSERT_INGESTION_SQL: &str =
        "INSERT INTO ingestion_records (code, ingested_at, batch_id) VALUES (?, ?, ?)";

    #[async_trait]
    impl CodeRepo for SqliteStore {
        async fn find_by_code(&self, code: &str) -> RegistryResult<Option<CodeRow>> {
            let mut rows: Vec<CodeRow> = sqlx::query_as("SELECT * FROM codes WHERE code = ? LIMIT 2")
                .bind(code)
                .fetch_all(&self.pool)
                .await?;

            if rows.len() > 1 {
                tracing::error!(code, "multiple registry entries for one code");
                return Err(RegistryError::InvariantViolation(format!(
                    "more than one registry entry for code '{code}'"
                )));
            }
            Ok(rows.pop())
        }

        async fn find_codes_batch(
            &self,
            codes: &[String],
        ) -> RegistryResult<HashMap<String, CodeRow>> {
            if codes.is_empty() {
                return Ok(HashMap::new());
            }

            // SQLite has a limit of ~999 parameters, so we batch if needed
            const BATCH_SIZE: usize = 900;
            let mut result = HashMap::with_capacity(codes.len());

            for batch in codes.chunks(BATCH_SIZE) {
                let placeholders: Vec<&str> = batch.iter().map(|_| "?").collect();
                let query = format!(
                    "SELECT * FROM codes WHERE code IN ({})",
                    placeholders.join(", ")
                );

                let mut query_builder = sqlx::query_as::<_, CodeRow>(&query);
                for code in batch {
                    query_builder = query_builder.bind(code);
                }

                for row in query_builder.fetch_all(&self.pool).await? {
                    result.insert(row.code.clone(), row);
                }
            }

            Ok(result)
        }

        async fn list_codes(&self) -> RegistryResult<Vec<String>> {
            let codes = sqlx::query_scalar("SELECT code FROM codes")
                .fetch_all(&self.pool)
                .await?;
            Ok(codes)
        }

        async fn list_entries(&self, limit: u32) -> RegistryResult<Vec<CodeRow>> {
            let rows = sqlx::query_as(
                "SELECT * FROM codes ORDER BY julianday(first_seen_time) DESC, code LIMIT ?",
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_entries_between(
            &self,
            start: Option<OffsetDateTime>,
            end: Option<OffsetDateTime>,
        ) -> RegistryResult<Vec<CodeRow>> {
            let rows = sqlx::query_as(
                r#"
                SELECT * FROM codes
                WHERE (?1 IS NULL OR julianday(first_seen_time) >= julianday(?1))
                  AND (?2 IS NULL OR julianday(first_seen_time) <= julianday(?2))
                ORDER BY julianday(first_seen_time) DESC, code
                "#,
            )
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn upsert_entry(
            &self,
            code: &str,
            batch_id: &str,
            at: OffsetDateTime,
        ) -> RegistryResult<CodeRow> {
            let mut tx = self.pool.begin().await?;

            let row: CodeRow = sqlx::query_as(UPSERT_ENTRY_SQL)
                .bind(code)
                .bind(at)
                .bind(at)
                .fetch_one(&mut *tx)
                .await?;

            sqlx::query(INSERT_INGESTION_SQL)
                .bind(code)
                .bind(at)
                .bind(batch_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(row)
        }

        async fn delete_entry(&self, code: &str) -> RegistryResult<()> {
            let result = sqlx::query("DELETE FROM codes WHERE code = ?")
                .bind(code)
                .execute(&self.pool)
                .await?;

            match result.rows_affected() {
                0 => Err(RegistryError::NotFound(format!("code '{code}'"))),
                1 => Ok(()),
                n => Err(RegistryError::InvariantViolation(format!(
                    "deleting code '{code}' removed {n} entries"
                ))),
            }
        }

        async fn count_codes(&self) -> RegistryResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM codes")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl IngestionRepo for SqliteStore {
        async fn bulk_upsert(&self, batch: &IngestBatch) -> RegistryResult<()> {
            let mut tx = self.pool.begin().await?;

            for code in &batch.codes {
                sqlx::query(UPSERT_ENTRY_SQL)
                    .bind(code)
                    .bind(batch.ingested_at)
                    .bind(batch.ingested_at)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query(INSERT_INGESTION_SQL)
                    .bind(code)
                    .bind(batch.ingested_at)
                    .bind(&batch.batch_id)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn list_ingestions(&self, code: &str) -> RegistryResult<Vec<IngestionRow>> {
            let rows = sqlx::query_as(
                "SELECT * FROM ingestion_records WHERE code = ? ORDER BY ingestion_id ASC",
            )
            .bind(code)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ScanEventRepo for SqliteStore {
        async fn increment_counter_and_append_history(
            &self,
            code: &str,
            at: OffsetDateTime,
        ) -> RegistryResult<Option<i64>> {
            let mut tx = self.pool.begin().await?;

            let counts: Vec<i64> = sqlx::query_scalar(
                r#"
                UPDATE codes
                SET total_scan_count = total_scan_count + 1, last_scan_time = ?
                WHERE code = ?
                RETURNING total_scan_count
                "#,
            )
            .bind(at)
            .bind(code)
            .fetch_all(&mut *tx)
            .await?;

            // Dropping `tx` without commit rolls the update back.
            let count = match counts.as_slice() {
                [] => return Ok(None),
                [count] => *count,
                _ => {
                    tracing::error!(code, rows = counts.len(), "scan increment touched multiple rows");
                    return Err(RegistryError::InvariantViolation(format!(
                        "increment for code '{code}' touched {} rows",
                        counts.len()
                    )));
                }
            };

            sqlx::query("INSERT INTO scan_events (code, outcome, occurred_at) VALUES (?, ?, ?)")
                .bind(code)
                .bind(ScanResult::Success.as_str())
                .bind(at)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(Some(count))
        }

        async fn append_scan_event(
            &self,
            code: &str,
            result: ScanResult,
            at: OffsetDateTime,
        ) -> RegistryResult<()> {
            sqlx::query("INSERT INTO scan_events (code, outcome, occurred_at) VALUES (?, ?, ?)")
                .bind(code)
                .bind(result.as_str())
                .bind(at)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn recent_success_exists(
            &self,
            code: &str,
            since: OffsetDateTime,
            until: OffsetDateTime,
        ) -> RegistryResult<bool> {
            let exists: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM scan_events
                    WHERE code = ?
                      AND outcome = 'success'
                      AND julianday(occurred_at) > julianday(?)
                      AND julianday(occurred_at) < julianday(?)
                )
                "#,
            )
            .bind(code)
            .bind(since)
            .bind(until)
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn recent_events(&self, limit: u32) -> RegistryResult<Vec<ScanEventRow>> {
            let rows = sqlx::query_as(
                r#"
                SELECT * FROM scan_events
                ORDER BY julianday(occurred_at) DESC, event_id DESC
                LIMIT ?
                "#,
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Registry entries: one row per tracked code
CREATE TABLE IF NOT EXISTS codes (
    code TEXT PRIMARY KEY NOT NULL,
    total_scan_count INTEGER NOT NULL DEFAULT 0 CHECK (total_scan_count >= 0),
    last_scan_time TEXT,
    first_seen_time TEXT NOT NULL,
    last_seen_time TEXT NOT NULL,
    total_upload_count INTEGER NOT NULL DEFAULT 1 CHECK (total_upload_count >= 1)
);

-- Ingestion log (append-only)
CREATE TABLE IF NOT EXISTS ingestion_records (
    ingestion_id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    batch_id TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ingestion_records_code ON ingestion_records(code);
CREATE INDEX IF NOT EXISTS idx_ingestion_records_batch ON ingestion_records(batch_id);

-- Scan history (append-only); duplicates are never recorded
CREATE TABLE IF NOT EXISTS scan_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    outcome TEXT NOT NULL CHECK (outcome IN ('success', 'unknown')),
    occurred_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scan_events_code_outcome ON scan_events(code, outcome);
CREATE INDEX IF NOT EXISTS idx_scan_events_occurred ON scan_events(occurred_at);
"#;
