// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling.
//!
//! Every timestamp the cache engine persists (`created_at`, `last_used_at`,
//! `min_retention_until`) goes through a [`Clock`] rather than calling
//! `SystemTime::now()` directly, so eviction-ordering and retention tests can
//! advance time deterministically instead of sleeping.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A clock that provides the current time.
pub trait Clock: Clone + Send + Sync {
    fn now(&self) -> Instant;
    fn epoch_ms(&self) -> u64;

    /// RFC3339Nano timestamp for the current instant, UTC.
    fn now_rfc3339(&self) -> String {
        epoch_ms_to_rfc3339(self.epoch_ms())
    }
}

/// Render milliseconds-since-epoch as an RFC3339Nano UTC timestamp.
pub fn epoch_ms_to_rfc3339(epoch_ms: u64) -> String {
    let secs = (epoch_ms / 1000) as i64;
    let millis = (epoch_ms % 1000) as u32;
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, millis * 1_000_000)
        .unwrap_or_else(|| chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap_or_default())
        .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

/// Real system clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Fake clock for testing with controllable time.
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<Instant>>,
    epoch_ms: Arc<Mutex<u64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
            epoch_ms: Arc::new(Mutex::new(1_000_000)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
        *self.epoch_ms.lock() += duration.as_millis() as u64;
    }

    /// Set the epoch milliseconds value.
    pub fn set_epoch_ms(&self, ms: u64) {
        *self.epoch_ms.lock() = ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }

    fn epoch_ms(&self) -> u64 {
        *self.epoch_ms.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_both_timelines() {
        let clock = FakeClock::new();
        let start = clock.epoch_ms();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.epoch_ms(), start + 5000);
    }

    #[test]
    fn rfc3339_round_trips_through_chrono() {
        let s = epoch_ms_to_rfc3339(1_700_000_000_000);
        let parsed = chrono::DateTime::parse_from_rfc3339(&s).expect("valid rfc3339");
        assert_eq!(parsed.timestamp_millis(), 1_700_000_000_000);
    }
}
