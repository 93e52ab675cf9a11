//! Shared registry test utilities.

#![allow(dead_code)]

use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tally_registry::{PostgresStore, RegistryError, RegistryResult, RegistryStore, SqliteStore};
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use time::{Duration, OffsetDateTime, UtcOffset, macros::datetime};

/// A SQLite registry in a temporary directory, removed on drop.
pub struct TestRegistry {
    pub store: Arc<dyn RegistryStore>,
    sqlite_store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

impl TestRegistry {
    pub async fn new() -> RegistryResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = Arc::new(SqliteStore::new(temp_dir.path().join("test.db"), None).await?);

        Ok(Self {
            store: store.clone(),
            sqlite_store: store,
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn RegistryStore> {
        self.store.clone()
    }

    /// Raw pool, for planting rows the public API refuses to create.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite_store.pool()
    }
}

/// A PostgreSQL registry backed by a throwaway container.
pub struct PostgresTestRegistry {
    pub store: Arc<dyn RegistryStore>,
    _container: ContainerAsync<Postgres>,
}

impl PostgresTestRegistry {
    pub async fn new() -> RegistryResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                RegistryError::Internal(format!("Failed to start PostgreSQL container: {e}"))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let store = PostgresStore::from_url(&url, 5, None).await?;

        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn RegistryStore> {
        self.store.clone()
    }
}

/// Run a test against both SQLite and PostgreSQL backends.
///
/// PostgreSQL is skipped when `SKIP_POSTGRES_TESTS` is set or Docker is unavailable.
pub async fn run_registry_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn RegistryStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestRegistry::new()
        .await
        .expect("Failed to create SQLite test registry");
    test_fn.clone()(sqlite.store()).await;

    if std::env::var("SKIP_POSTGRES_TESTS").is_err() {
        match PostgresTestRegistry::new().await {
            Ok(postgres) => test_fn(postgres.store()).await,
            Err(err) => eprintln!("Skipping PostgreSQL registry tests: {err}"),
        }
    }
}

/// Fixed reference instant in the deployment offset (UTC+08:00).
pub fn base_time() -> OffsetDateTime {
    datetime!(2024-03-01 09:00:00 UTC).to_offset(taipei())
}

/// `base_time()` shifted by `millis`.
pub fn at_ms(millis: i64) -> OffsetDateTime {
    base_time() + Duration::milliseconds(millis)
}

pub fn taipei() -> UtcOffset {
    UtcOffset::from_hms(8, 0, 0).expect("valid offset")
}
