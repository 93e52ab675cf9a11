//! Shared engine test utilities.

#![allow(dead_code)]

pub mod faulty;

use faulty::FaultyStore;
use std::sync::Arc;
use tally_core::config::EngineConfig;
use tally_core::{Clock, ManualClock, ScanTime};
use tally_engine::ScanValidator;
use tally_registry::{RegistryStore, SqliteStore};
use tempfile::TempDir;
use time::UtcOffset;

/// Engine settings used by tests: production windows, short store timeout.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        store_timeout_secs: 1,
        ..EngineConfig::default()
    }
}

/// A validator over a temporary SQLite registry, driven by a manual clock.
pub struct TestEngine {
    pub validator: Arc<ScanValidator>,
    pub clock: Arc<ManualClock>,
    /// The real store, bypassing any fault injection.
    pub store: Arc<dyn RegistryStore>,
    /// Fault switches sitting between the validator and `store`.
    pub faults: Arc<FaultyStore>,
    _temp_dir: TempDir,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store: Arc<dyn RegistryStore> = Arc::new(
            SqliteStore::new(temp_dir.path().join("test.db"), None)
                .await
                .expect("Failed to create SQLite registry"),
        );
        let clock = Arc::new(ManualClock::starting_now(taipei()));
        let faults = Arc::new(FaultyStore::new(store.clone()));

        let validator = ScanValidator::new(
            faults.clone() as Arc<dyn RegistryStore>,
            clock.clone() as Arc<dyn Clock>,
            &config,
        )
        .expect("Failed to build validator");

        Self {
            validator: Arc::new(validator),
            clock,
            store,
            faults,
            _temp_dir: temp_dir,
        }
    }

    /// A second validator sharing this engine's registry and clock, as a
    /// separate process would.
    pub fn sibling(&self) -> ScanValidator {
        ScanValidator::new(
            self.store.clone(),
            self.clock.clone() as Arc<dyn Clock>,
            &test_config(),
        )
        .expect("Failed to build validator")
    }

    pub fn now(&self) -> ScanTime {
        self.clock.now()
    }

    /// Ingest codes through the validator and assert success.
    pub async fn seed(&self, codes: &[&str]) {
        self.validator
            .ingest_codes(codes.iter().copied(), "seed", self.now())
            .await
            .expect("seed ingestion failed");
    }

    pub async fn scan_count(&self, code: &str) -> i64 {
        self.store
            .find_by_code(code)
            .await
            .unwrap()
            .map(|row| row.total_scan_count)
            .unwrap_or(0)
    }
}

pub fn taipei() -> UtcOffset {
    UtcOffset::from_hms(8, 0, 0).expect("valid offset")
}
