//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use time::UtcOffset;

/// Scan engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts for the same code closer together than this are rejected
    /// in-process without touching the store.
    #[serde(default = "default_fast_reject_window_ms")]
    pub fast_reject_window_ms: u64,
    /// A successful scan event for the same code within this window makes
    /// the attempt a duplicate.
    #[serde(default = "default_duplicate_window_ms")]
    pub duplicate_window_ms: u64,
    /// Debounce ledger entries older than this are purged.
    #[serde(default = "default_ledger_horizon_ms")]
    pub ledger_horizon_ms: u64,
    /// Existence cache staleness limit in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Upper bound for a single durable store call made by the engine.
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    /// Fixed civil offset (hours east of UTC) for persisted timestamps.
    /// Defaults to UTC+8 (Asia/Taipei, which observes no DST).
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i8,
}

fn default_fast_reject_window_ms() -> u64 {
    500
}

fn default_duplicate_window_ms() -> u64 {
    1000
}

fn default_ledger_horizon_ms() -> u64 {
    2000
}

fn default_cache_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_store_timeout_secs() -> u64 {
    10
}

fn default_utc_offset_hours() -> i8 {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fast_reject_window_ms: default_fast_reject_window_ms(),
            duplicate_window_ms: default_duplicate_window_ms(),
            ledger_horizon_ms: default_ledger_horizon_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            store_timeout_secs: default_store_timeout_secs(),
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

impl EngineConfig {
    pub fn fast_reject_window(&self) -> Duration {
        Duration::from_millis(self.fast_reject_window_ms)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }

    pub fn ledger_horizon(&self) -> Duration {
        Duration::from_millis(self.ledger_horizon_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// The configured offset for persisted timestamps.
    pub fn utc_offset(&self) -> crate::Result<UtcOffset> {
        UtcOffset::from_hms(self.utc_offset_hours, 0, 0).map_err(|e| {
            crate::Error::Config(format!(
                "engine.utc_offset_hours={} is out of range: {e}",
                self.utc_offset_hours
            ))
        })
    }

    /// Validate engine configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        if self.fast_reject_window_ms == 0 {
            return Err(crate::Error::Config(
                "engine.fast_reject_window_ms must be greater than 0".to_string(),
            ));
        }
        // Purging entries that are still inside the fast window would let
        // rapid repeats through.
        if self.ledger_horizon_ms < self.fast_reject_window_ms {
            return Err(crate::Error::Config(format!(
                "engine.ledger_horizon_ms ({}) must be >= engine.fast_reject_window_ms ({})",
                self.ledger_horizon_ms, self.fast_reject_window_ms
            )));
        }
        if self.store_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "engine.store_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(crate::Error::Config(format!(
                "engine.utc_offset_hours={} must be between -12 and 14",
                self.utc_offset_hours
            )));
        }
        Ok(())
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Registry store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistryConfig {
    /// SQLite database (single instance deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot cancel statements).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database user.
        username: Option<String>,
        /// Database password. Prefer TALLY_REGISTRY__PASSWORD over the config file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode.
        #[serde(default)]
        ssl_mode: Option<PgSslMode>,
        /// Connection pool size.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Server-side statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(10_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/tally.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl RegistryConfig {
    /// Validate registry configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            Self::Sqlite { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::Config(
                        "registry.path must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if url.is_none() && (host.is_none() || database.is_none()) {
                    return Err(crate::Error::Config(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ));
                }
                if *max_connections == 0 {
                    return Err(crate::Error::Config(
                        "registry.max_connections must be greater than 0".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Registry store configuration.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Scan engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Validate the whole configuration.
    pub fn validate(&self) -> crate::Result<()> {
        self.registry.validate()?;
        self.engine.validate()
    }
}
