//! Time source for debounce windows and persisted timestamps.
//!
//! Debounce decisions use a monotonic [`Instant`]; persisted records use a
//! wall-clock [`OffsetDateTime`] pinned to one fixed civil offset so that
//! every stored timestamp shares the same representation.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use time::{OffsetDateTime, UtcOffset};

/// A paired monotonic and wall-clock reading taken at the same moment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanTime {
    /// Monotonic instant used for in-process windows.
    pub monotonic: Instant,
    /// Wall-clock time used for persisted records.
    pub wall: OffsetDateTime,
}

impl ScanTime {
    /// Build a reading from its parts.
    pub fn new(monotonic: Instant, wall: OffsetDateTime) -> Self {
        Self { monotonic, wall }
    }

    /// The same reading shifted forward by `by` on both clocks.
    pub fn after(&self, by: Duration) -> Self {
        Self {
            monotonic: self.monotonic + by,
            wall: self.wall + by,
        }
    }
}

/// Source of [`ScanTime`] readings.
pub trait Clock: Send + Sync {
    /// Current reading.
    fn now(&self) -> ScanTime;
}

/// Real clock reporting wall time in a fixed offset.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// The offset persisted timestamps are reported in.
    pub fn offset(&self) -> UtcOffset {
        self.offset
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(UtcOffset::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> ScanTime {
        ScanTime {
            monotonic: Instant::now(),
            wall: OffsetDateTime::now_utc().to_offset(self.offset),
        }
    }
}

/// Manually advanced clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<ScanTime>,
}

impl ManualClock {
    /// Start at the given reading.
    pub fn new(start: ScanTime) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Start at the current real time in the given offset.
    pub fn starting_now(offset: UtcOffset) -> Self {
        Self::new(SystemClock::new(offset).now())
    }

    /// Move both clocks forward.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = current.after(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> ScanTime {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_uses_offset() {
        let offset = UtcOffset::from_hms(8, 0, 0).unwrap();
        let clock = SystemClock::new(offset);
        assert_eq!(clock.now().wall.offset(), offset);
    }

    #[test]
    fn test_manual_clock_advances_both() {
        let clock = ManualClock::starting_now(UtcOffset::UTC);
        let before = clock.now();
        clock.advance(Duration::from_millis(1500));
        let after = clock.now();

        assert_eq!(after.monotonic - before.monotonic, Duration::from_millis(1500));
        assert_eq!(after.wall - before.wall, time::Duration::milliseconds(1500));
    }
}
