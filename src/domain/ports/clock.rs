//! Clock and ID source.
//!
//! All month-rollover and minute-window logic derives from this port so
//! quota tests can inject time instead of sleeping across boundaries.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Time source for the core. Implementations must be cheap and lock-free.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Seconds since the Unix epoch.
    fn unix_seconds(&self) -> i64 {
        self.now().timestamp()
    }

    /// Integer minute window, `floor(unix / 60)`.
    fn minute_index(&self) -> i64 {
        self.unix_seconds().div_euclid(60)
    }

    /// Seconds until the current minute window closes.
    fn seconds_to_next_minute(&self) -> u64 {
        (60 - self.unix_seconds().rem_euclid(60)) as u64
    }

    /// Calendar month key, `YYYY-MM`.
    fn month_key(&self) -> String {
        self.now().format("%Y-%m").to_string()
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests: starts at a fixed instant and only moves
/// when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    offset_secs: AtomicI64,
    base: i64,
}

impl ManualClock {
    /// Clock frozen at the given Unix timestamp.
    pub fn at_unix(base: i64) -> Self {
        Self {
            offset_secs: AtomicI64::new(0),
            base,
        }
    }

    /// Advance by the given number of seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.offset_secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ts = self.base + self.offset_secs.load(Ordering::SeqCst);
        DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minute_index_and_remainder() {
        // 2026-08-01T00:00:30Z
        let clock = ManualClock::at_unix(1_785_456_030);
        let minute = clock.minute_index();
        assert_eq!(clock.seconds_to_next_minute(), 30);
        clock.advance_secs(30);
        assert_eq!(clock.minute_index(), minute + 1);
    }

    #[test]
    fn test_month_key_format() {
        let clock = SystemClock;
        let key = clock.month_key();
        assert_eq!(key.len(), 7);
        assert_eq!(&key[4..5], "-");
    }

    #[test]
    fn test_manual_clock_advances_across_month() {
        // 2026-01-31T23:59:00Z
        let clock = ManualClock::at_unix(1_769_903_940);
        let before = clock.month_key();
        clock.advance_secs(120);
        let after = clock.month_key();
        assert_ne!(before, after);
    }
}
