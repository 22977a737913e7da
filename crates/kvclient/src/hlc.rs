//! Hybrid logical clock.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A point in time on a hybrid logical clock.
///
/// Ordered by wall time then logical counter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Nanoseconds since the unix epoch.
    pub wall_time: i64,
    /// Disambiguates events within the same wall time.
    pub logical: i32,
}

impl Timestamp {
    pub const MIN: Timestamp = Timestamp {
        wall_time: 0,
        logical: 0,
    };

    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Timestamp { wall_time, logical }
    }

    /// The timestamp immediately following this one.
    pub fn next(&self) -> Self {
        if self.logical == i32::MAX {
            Timestamp::new(self.wall_time + 1, 0)
        } else {
            Timestamp::new(self.wall_time, self.logical + 1)
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::MIN
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09},{}",
            self.wall_time / 1_000_000_000,
            self.wall_time % 1_000_000_000,
            self.logical
        )
    }
}

type PhysicalClock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Source of strictly increasing timestamps.
pub struct Clock {
    physical: PhysicalClock,
    last: Mutex<Timestamp>,
}

impl Clock {
    /// Create a clock backed by system time.
    pub fn new() -> Self {
        Self::with_physical_clock(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or_default()
        })
    }

    pub fn with_physical_clock(physical: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Clock {
            physical: Box::new(physical),
            last: Mutex::new(Timestamp::MIN),
        }
    }

    /// Get a timestamp greater than any previously returned.
    ///
    /// If physical time hasn't moved forward (or went backwards), the logical
    /// counter is bumped instead.
    pub fn now(&self) -> Timestamp {
        let physical = (self.physical)();
        let mut last = self.last.lock();
        let ts = if physical > last.wall_time {
            Timestamp::new(physical, 0)
        } else {
            last.next()
        };
        *last = ts;
        ts
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("last", &*self.last.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_physical_clock_bumps_logical() {
        let clock = Clock::with_physical_clock(|| 100);
        assert_eq!(Timestamp::new(100, 0), clock.now());
        assert_eq!(Timestamp::new(100, 1), clock.now());
        assert_eq!(Timestamp::new(100, 2), clock.now());
    }

    #[test]
    fn backwards_physical_clock() {
        let times = Mutex::new(vec![5, 10]);
        let clock = Clock::with_physical_clock(move || times.lock().pop().unwrap_or(1));
        assert_eq!(Timestamp::new(10, 0), clock.now());
        assert_eq!(Timestamp::new(10, 1), clock.now());
        assert_eq!(Timestamp::new(10, 2), clock.now());
    }

    #[test]
    fn system_clock_monotonic() {
        let clock = Clock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let ts = clock.now();
            assert!(ts > prev);
            prev = ts;
        }
    }

    #[test]
    fn display() {
        assert_eq!("1.000000005,3", Timestamp::new(1_000_000_005, 3).to_string());
    }
}
