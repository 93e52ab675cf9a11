//! Process-local mirror of the set of registered codes.
//!
//! The cache answers "is this code tracked?" without a store round trip.
//! It is rebuilt wholesale from the registry when older than its TTL and
//! patched in place right after local writes, so codes ingested through this
//! process are visible immediately. Writes made by other processes become
//! visible at the next reload.

use crate::error::{EngineResult, bounded};
use crate::metrics;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_core::Clock;
use tally_registry::RegistryStore;
use tokio::sync::Mutex;

/// Snapshot of the cache for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    /// Number of codes currently cached.
    pub size: usize,
    /// Time since the last successful reload, `None` before the first one.
    pub age: Option<Duration>,
    /// Whether the next lookup will be answered without a reload.
    pub is_fresh: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    members: HashSet<String>,
    refreshed_at: Option<Instant>,
}

impl CacheState {
    fn age(&self, now: Instant) -> Option<Duration> {
        self.refreshed_at
            .map(|at| now.saturating_duration_since(at))
    }

    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.age(now).is_some_and(|age| age < ttl)
    }
}

/// Existence cache over the registry's code set.
pub struct ExistenceCache {
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    ttl: Duration,
    store_timeout: Duration,
}

impl ExistenceCache {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            state: Mutex::new(CacheState::default()),
            ttl,
            store_timeout,
        }
    }

    /// Whether `code` is registered, reloading first if the snapshot is stale.
    ///
    /// The staleness check and the reload happen under one lock, so
    /// concurrent callers never trigger more than one reload at a time.
    pub async fn contains(&self, code: &str) -> EngineResult<bool> {
        let mut state = self.state.lock().await;
        let now = self.clock.now().monotonic;
        if !state.is_fresh(now, self.ttl) {
            self.reload_locked(&mut state).await?;
        }
        Ok(state.members.contains(code))
    }

    /// Add a code right after it was written to the store.
    pub async fn insert(&self, code: &str) {
        let mut state = self.state.lock().await;
        state.members.insert(code.to_string());
        metrics::CACHE_SIZE.set(state.members.len() as i64);
    }

    /// Add many codes right after they were written to the store.
    pub async fn extend<I>(&self, codes: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state.lock().await;
        state.members.extend(codes);
        metrics::CACHE_SIZE.set(state.members.len() as i64);
    }

    /// Drop a code right after it was deleted from the store.
    pub async fn remove(&self, code: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.members.remove(code);
        metrics::CACHE_SIZE.set(state.members.len() as i64);
        removed
    }

    /// Empty the cache after the registry was wiped.
    ///
    /// The empty set counts as a fresh snapshot of an empty registry.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.members.clear();
        state.refreshed_at = Some(self.clock.now().monotonic);
        metrics::CACHE_SIZE.set(0);
    }

    /// Rebuild from the store regardless of age. Returns the number of codes loaded.
    pub async fn force_reload(&self) -> EngineResult<usize> {
        let mut state = self.state.lock().await;
        self.reload_locked(&mut state).await
    }

    /// Current size and freshness.
    pub async fn status(&self) -> CacheStatus {
        let state = self.state.lock().await;
        let now = self.clock.now().monotonic;
        CacheStatus {
            size: state.members.len(),
            age: state.age(now),
            is_fresh: state.is_fresh(now, self.ttl),
        }
    }

    /// On failure the previous snapshot and its timestamp are left untouched.
    async fn reload_locked(&self, state: &mut CacheState) -> EngineResult<usize> {
        let codes = bounded("list_codes", self.store_timeout, self.store.list_codes())
            .await
            .inspect_err(|err| tracing::warn!(error = %err, "existence cache reload failed"))?;

        let members: HashSet<String> = codes.into_iter().collect();
        let loaded = members.len();
        state.members = members;
        state.refreshed_at = Some(self.clock.now().monotonic);

        metrics::CACHE_RELOADS.inc();
        metrics::CACHE_SIZE.set(loaded as i64);
        tracing::info!(codes = loaded, "existence cache reloaded");

        Ok(loaded)
    }
}
