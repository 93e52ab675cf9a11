//! PostgreSQL-based registry store implementation.

use crate::error::{RegistryError, RegistryResult};
use crate::models::*;
use crate::repos::{CodeRepo, IngestionRepo, ScanEventRepo};
use crate::store::RegistryStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::collections::HashMap;
use std::str::FromStr;
use tally_core::ScanResult;
use tally_core::config::PgSslMode;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

const UPSERT_ENTRY_SQL: &str = r#"
    INSERT INTO codes (code, total_scan_count, last_scan_time, first_seen_time, last_seen_time, total_upload_count)
    VALUES ($1, 0, NULL, $2, $2, 1)
    ON CONFLICT (code) DO UPDATE SET
        total_upload_count = codes.total_upload_count + 1,
        last_seen_time = EXCLUDED.last_seen_time
    RETURNING *
"#;

const INSERT_INGESTION_SQL: &str =
    "INSERT INTO ingestion_records (code, ingested_at, batch_id) VALUES ($1, $2, $3)";

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based registry store.
///
/// Safe to share between several validator processes: counter increments
/// take a row lock, so concurrent scans of one code serialize in the database.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> RegistryResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password come from its own environment variable instead of
    /// being embedded in a URL.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> RegistryResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host,
            port,
            database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL registry"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> RegistryResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!(timeout_ms, "PostgreSQL statement_timeout set");
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl RegistryStore for PostgresStore {
    async fn migrate(&self) -> RegistryResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
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

#[async_trait]
impl CodeRepo for PostgresStore {
    async fn find_by_code(&self, code: &str) -> RegistryResult<Option<CodeRow>> {
        let mut rows: Vec<CodeRow> = sqlx::query_as("SELECT * FROM codes WHERE code = $1 LIMIT 2")
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

    async fn find_codes_batch(&self, codes: &[String]) -> RegistryResult<HashMap<String, CodeRow>> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<CodeRow> = sqlx::query_as("SELECT * FROM codes WHERE code = ANY($1)")
            .bind(codes)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| (row.code.clone(), row)).collect())
    }

    async fn list_codes(&self) -> RegistryResult<Vec<String>> {
        let codes = sqlx::query_scalar("SELECT code FROM codes")
            .fetch_all(&self.pool)
            .await?;
        Ok(codes)
    }

    async fn list_entries(&self, limit: u32) -> RegistryResult<Vec<CodeRow>> {
        let rows = sqlx::query_as("SELECT * FROM codes ORDER BY first_seen_time DESC, code LIMIT $1")
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
            WHERE ($1::timestamptz IS NULL OR first_seen_time >= $1)
              AND ($2::timestamptz IS NULL OR first_seen_time <= $2)
            ORDER BY first_seen_time DESC, code
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
        let result = sqlx::query("DELETE FROM codes WHERE code = $1")
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
impl IngestionRepo for PostgresStore {
    async fn bulk_upsert(&self, batch: &IngestBatch) -> RegistryResult<()> {
        let mut tx = self.pool.begin().await?;

        for code in &batch.codes {
            sqlx::query(UPSERT_ENTRY_SQL)
                .bind(code)
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
            "SELECT * FROM ingestion_records WHERE code = $1 ORDER BY ingestion_id ASC",
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ScanEventRepo for PostgresStore {
    async fn increment_counter_and_append_history(
        &self,
        code: &str,
        at: OffsetDateTime,
    ) -> RegistryResult<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        // The UPDATE holds the row lock until commit, serializing concurrent scans of one code.
        let counts: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE codes
            SET total_scan_count = total_scan_count + 1, last_scan_time = $1
            WHERE code = $2
            RETURNING total_scan_count
            "#,
        )
        .bind(at)
        .bind(code)
        .fetch_all(&mut *tx)
        .await?;

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

        sqlx::query("INSERT INTO scan_events (code, outcome, occurred_at) VALUES ($1, $2, $3)")
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
        sqlx::query("INSERT INTO scan_events (code, outcome, occurred_at) VALUES ($1, $2, $3)")
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
                WHERE code = $1
                  AND outcome = 'success'
                  AND occurred_at > $2
                  AND occurred_at < $3
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
            "SELECT * FROM scan_events ORDER BY occurred_at DESC, event_id DESC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
