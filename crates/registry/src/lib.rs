//! Durable registry store for Tally.
//!
//! This crate owns everything that must survive a restart:
//! - Registry entries (one per tracked code, with scan and upload counters)
//! - The append-only ingestion log
//! - The append-only scan history
//!
//! Scan counters change in exactly one place,
//! [`ScanEventRepo::increment_counter_and_append_history`], which bumps the
//! counter and records the event in a single transaction.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{RegistryError, RegistryResult};
pub use models::{ClearStats, CodeRow, IngestBatch, IngestionRow, RegistryStats, ScanEventRow};
pub use postgres::PostgresStore;
pub use repos::{CodeRepo, IngestionRepo, ScanEventRepo};
pub use store::{RegistryStore, SqliteStore};

use std::sync::Arc;
use tally_core::config::RegistryConfig;

/// Create a registry store from configuration.
pub async fn from_config(config: &RegistryConfig) -> RegistryResult<Arc<dyn RegistryStore>> {
    match config {
        RegistryConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn RegistryStore>)
        }
        RegistryConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(RegistryError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn RegistryStore>)
        }
    }
}
