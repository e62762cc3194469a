//! Monotonic microsecond time base.
//!
//! Every timestamp in the pipeline (vertical sync, predicted exposure
//! start, buffer completion, action fire time) lives in the time domain of
//! one [`Clock`]. The sensor backend owns that clock, so hardware
//! timestamps and daemon predictions are directly comparable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// A point in time, in microseconds since the clock's origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The clock origin.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Creates a timestamp from microseconds since the origin.
    #[inline]
    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    /// Returns microseconds since the origin.
    #[inline]
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Signed microseconds from `earlier` to `self`.
    #[inline]
    pub fn micros_since(self, earlier: Timestamp) -> i64 {
        self.0 - earlier.0
    }

    /// Duration until `later`, or zero if `later` is not in the future.
    pub fn duration_until(self, later: Timestamp) -> Duration {
        let us = later.0 - self.0;
        if us > 0 {
            Duration::from_micros(us as u64)
        } else {
            Duration::ZERO
        }
    }
}

impl Add<i64> for Timestamp {
    type Output = Timestamp;

    fn add(self, us: i64) -> Timestamp {
        Timestamp(self.0 + us)
    }
}

impl AddAssign<i64> for Timestamp {
    fn add_assign(&mut self, us: i64) {
        self.0 += us;
    }
}

impl Sub<i64> for Timestamp {
    type Output = Timestamp;

    fn sub(self, us: i64) -> Timestamp {
        Timestamp(self.0 - us)
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = i64;

    fn sub(self, other: Timestamp) -> i64 {
        self.0 - other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}s", self.0.div_euclid(1_000_000), self.0.rem_euclid(1_000_000))
    }
}

/// Source of monotonic time.
///
/// `sleep` and `spin` go through the clock so tests can drive time
/// explicitly instead of really sleeping or busy-waiting.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> Timestamp;

    /// Coarse sleep.
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// One iteration of a busy-wait loop.
    fn spin(&self) {
        std::hint::spin_loop();
    }
}

/// Wall-clock backed monotonic clock.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Clock starting at zero now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed().as_micros() as i64)
    }
}

/// Manually driven clock for deterministic tests.
///
/// Time only moves when the test calls [`ManualClock::advance`] or
/// [`ManualClock::set`], or when a consumer sleeps or spins: `sleep`
/// jumps forward by the requested duration and `spin` advances one
/// microsecond, so a busy-wait terminates exactly at its deadline.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Clock reading `start` until moved.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start.as_micros()),
        }
    }

    /// Moves time forward by `us` microseconds.
    pub fn advance(&self, us: i64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }

    /// Sets the current time.
    pub fn set(&self, t: Timestamp) {
        self.now.store(t.as_micros(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration.as_micros() as i64);
    }

    fn spin(&self) {
        self.advance(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_micros(1_000);
        assert_eq!((t + 500).as_micros(), 1_500);
        assert_eq!((t - 250).as_micros(), 750);
        assert_eq!(Timestamp::from_micros(3_000) - t, 2_000);
        assert_eq!(t.duration_until(Timestamp::from_micros(400)), Duration::ZERO);
        assert_eq!(
            t.duration_until(Timestamp::from_micros(1_250)),
            Duration::from_micros(250)
        );
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Timestamp::from_micros(2_000_045).to_string(), "2.000045s");
    }

    #[test]
    fn test_manual_clock_sleep_and_spin() {
        let clock = ManualClock::new(Timestamp::from_micros(100));
        clock.sleep(Duration::from_micros(50));
        assert_eq!(clock.now().as_micros(), 150);
        clock.spin();
        assert_eq!(clock.now().as_micros(), 151);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now() > a);
    }
}
