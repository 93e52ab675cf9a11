//! Per-code mutual exclusion for the durable duplicate check and the
//! counter increment that follows it.
//!
//! Two admitted attempts for the same code must not both observe an empty
//! duplicate window before either of them records its success. Attempts for
//! different codes never wait on each other.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub(crate) struct CodeLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held while one attempt checks and counts a code.
///
/// Dropping the last guard for a code removes its map entry.
pub(crate) struct CodeLockGuard<'a> {
    locks: &'a CodeLocks,
    code: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl CodeLocks {
    pub(crate) async fn lock(&self, code: &str) -> CodeLockGuard<'_> {
        let mutex = self.locks.entry(code.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        CodeLockGuard {
            locks: self,
            code: code.to_string(),
            guard: Some(guard),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for CodeLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or waits.
        self.locks
            .locks
            .remove_if(&self.code, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
