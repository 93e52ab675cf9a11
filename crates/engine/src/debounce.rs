//! In-process fast-repeat rejection.
//!
//! The guard remembers the most recent attempt for each code. An attempt
//! closer than the fast window to the previous one is rejected, and every
//! attempt (rejected or not) becomes the new reference point. A scanner
//! held on one barcode therefore stays rejected until it pauses for a full
//! window.
//!
//! # Memory
//!
//! Entries older than the ledger horizon are purged on every admission, so
//! the map only ever holds codes scanned within the last couple of seconds.
//! The guard keeps a lower bound on the oldest recorded attempt and only
//! walks the map when that bound has left the horizon.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-code debounce ledger.
#[derive(Debug)]
pub struct DebounceGuard {
    last_attempt: DashMap<String, Instant>,
    window: Duration,
    horizon: Duration,
    epoch: Instant,
    /// Nanoseconds from `epoch` to no later than the oldest entry.
    oldest: AtomicU64,
}

/// Result of [`DebounceGuard::admit`].
///
/// Carries the ledger value that was replaced so a failed attempt can be
/// undone with [`DebounceGuard::rollback`].
#[derive(Debug, Clone)]
#[must_use]
pub struct Admission {
    code: String,
    admitted: bool,
    previous: Option<Instant>,
    recorded: Instant,
}

impl Admission {
    /// Whether the attempt passed the fast window.
    pub fn is_admitted(&self) -> bool {
        self.admitted
    }

    /// Time since the previous attempt, if there was one in the ledger.
    pub fn since_previous(&self) -> Option<Duration> {
        self.previous.map(|prev| distance(prev, self.recorded))
    }
}

/// Absolute distance between two instants, in either order.
fn distance(a: Instant, b: Instant) -> Duration {
    if a >= b { a - b } else { b - a }
}

impl DebounceGuard {
    pub fn new(window: Duration, horizon: Duration) -> Self {
        Self {
            last_attempt: DashMap::new(),
            window,
            horizon,
            epoch: Instant::now(),
            oldest: AtomicU64::new(u64::MAX),
        }
    }

    fn offset(&self, at: Instant) -> u64 {
        let nanos = at.saturating_duration_since(self.epoch).as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }

    fn note_recorded(&self, at: Instant) {
        self.oldest.fetch_min(self.offset(at), Ordering::AcqRel);
    }

    /// Whether some entry may have fallen out of the horizon.
    fn purge_due(&self, now: Instant) -> bool {
        let oldest = self.oldest.load(Ordering::Acquire);
        if oldest == u64::MAX {
            return false;
        }
        let horizon = u64::try_from(self.horizon.as_nanos()).unwrap_or(u64::MAX);
        self.offset(now).saturating_sub(oldest) > horizon
    }

    /// Record an attempt for `code` at `now` and decide whether it may proceed.
    pub fn admit(&self, code: &str, now: Instant) -> Admission {
        if self.purge_due(now) {
            self.purge(now);
        }

        let previous = self.last_attempt.insert(code.to_string(), now);
        self.note_recorded(now);
        let admitted = match previous {
            Some(prev) => distance(prev, now) >= self.window,
            None => true,
        };

        Admission {
            code: code.to_string(),
            admitted,
            previous,
            recorded: now,
        }
    }

    /// Undo an admission whose durable work failed.
    ///
    /// The previous ledger value is restored only if no later attempt has
    /// replaced the one this admission recorded.
    pub fn rollback(&self, admission: &Admission) {
        let Some(mut entry) = self.last_attempt.get_mut(&admission.code) else {
            return;
        };
        if *entry != admission.recorded {
            return;
        }
        match admission.previous {
            Some(prev) => {
                *entry = prev;
                drop(entry);
                self.note_recorded(prev);
            }
            None => {
                drop(entry);
                self.last_attempt
                    .remove_if(&admission.code, |_, at| *at == admission.recorded);
            }
        }
    }

    /// Drop entries that fell out of the horizon relative to `now`.
    pub fn purge(&self, now: Instant) -> usize {
        let before = self.last_attempt.len();
        let mut oldest = u64::MAX;
        self.last_attempt.retain(|_, at| {
            let keep = now.saturating_duration_since(*at) <= self.horizon;
            if keep {
                oldest = oldest.min(self.offset(*at));
            }
            keep
        });
        // A concurrent record may be lost here; its entry then waits for
        // the next purge, which is at most one horizon later.
        self.oldest.store(oldest, Ordering::Release);
        before.saturating_sub(self.last_attempt.len())
    }

    /// Forget every code.
    pub fn clear(&self) {
        self.last_attempt.clear();
        self.oldest.store(u64::MAX, Ordering::Release);
    }

    /// Number of codes currently tracked.
    pub fn len(&self) -> usize {
        self.last_attempt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_attempt.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> DebounceGuard {
        DebounceGuard::new(Duration::from_millis(500), Duration::from_secs(2))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_first_attempt_is_admitted() {
        let guard = guard();
        let admission = guard.admit("A", Instant::now());
        assert!(admission.is_admitted());
        assert_eq!(admission.since_previous(), None);
    }

    #[test]
    fn test_rapid_repeat_rejected_then_quiet_period_admitted() {
        let guard = guard();
        let t0 = Instant::now();

        assert!(guard.admit("A", t0).is_admitted());
        assert!(!guard.admit("A", t0 + ms(100)).is_admitted());
        // Measured from the rejected attempt at +100ms, not from t0.
        assert!(!guard.admit("A", t0 + ms(550)).is_admitted());
        assert!(guard.admit("A", t0 + ms(1050)).is_admitted());
    }

    #[test]
    fn test_exact_window_boundary_is_admitted() {
        let guard = guard();
        let t0 = Instant::now();
        assert!(guard.admit("A", t0).is_admitted());
        assert!(guard.admit("A", t0 + ms(500)).is_admitted());
    }

    #[test]
    fn test_codes_are_independent() {
        let guard = guard();
        let t0 = Instant::now();
        assert!(guard.admit("A", t0).is_admitted());
        assert!(guard.admit("B", t0 + ms(10)).is_admitted());
        assert!(!guard.admit("A", t0 + ms(20)).is_admitted());
    }

    #[test]
    fn test_out_of_order_attempts_compare_by_distance() {
        let guard = guard();
        let t0 = Instant::now();
        assert!(guard.admit("A", t0 + ms(300)).is_admitted());
        // Arrives later but carries an earlier reading.
        assert!(!guard.admit("A", t0 + ms(100)).is_admitted());
    }

    #[test]
    fn test_purge_drops_entries_beyond_horizon() {
        let guard = guard();
        let t0 = Instant::now();
        let _ = guard.admit("old", t0);
        let _ = guard.admit("fresh", t0 + ms(1900));
        assert_eq!(guard.len(), 2);

        let _ = guard.admit("other", t0 + ms(2500));
        assert_eq!(guard.len(), 2);
        assert_eq!(guard.purge(t0 + ms(10_000)), 2);
        assert!(guard.is_empty());
    }

    #[test]
    fn test_admit_skips_walk_until_oldest_leaves_horizon() {
        let guard = guard();
        let t0 = Instant::now();
        let _ = guard.admit("A", t0);
        let _ = guard.admit("B", t0 + ms(1500));

        assert!(!guard.purge_due(t0 + ms(1900)));
        let _ = guard.admit("C", t0 + ms(1900));
        assert_eq!(guard.len(), 3);

        // A is now past the horizon; the walk drops it and moves the bound to B.
        assert!(guard.purge_due(t0 + ms(2100)));
        let _ = guard.admit("D", t0 + ms(2100));
        assert_eq!(guard.len(), 3);
        assert!(!guard.purge_due(t0 + ms(3400)));
        assert!(guard.purge_due(t0 + ms(3600)));
    }

    #[test]
    fn test_rollback_restores_previous_attempt() {
        let guard = guard();
        let t0 = Instant::now();
        let _ = guard.admit("A", t0);
        let second = guard.admit("A", t0 + ms(800));
        assert!(second.is_admitted());

        guard.rollback(&second);
        // Ledger is back at t0, so +900ms is still outside the window.
        assert!(guard.admit("A", t0 + ms(900)).is_admitted());
    }

    #[test]
    fn test_rollback_of_first_attempt_removes_entry() {
        let guard = guard();
        let t0 = Instant::now();
        let first = guard.admit("A", t0);

        guard.rollback(&first);
        assert!(guard.is_empty());
        assert!(guard.admit("A", t0 + ms(10)).is_admitted());
    }

    #[test]
    fn test_rollback_ignored_after_newer_attempt() {
        let guard = guard();
        let t0 = Instant::now();
        let first = guard.admit("A", t0);
        let _ = guard.admit("A", t0 + ms(100));

        guard.rollback(&first);
        assert!(!guard.admit("A", t0 + ms(200)).is_admitted());
    }

    #[test]
    fn test_clear_forgets_everything() {
        let guard = guard();
        let t0 = Instant::now();
        let _ = guard.admit("A", t0);
        guard.clear();
        assert!(guard.admit("A", t0 + ms(1)).is_admitted());
    }
}
