//! Time sources for the circuit breaker
//!
//! All breaker timestamps are monotonic offsets (`Duration`) from an anchor
//! chosen by the time source, never wall-clock time:
//! - `MonotonicClock`: anchored on `Instant`, immune to NTP adjustments
//! - `ManualClock`: advanced explicitly, for deterministic tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic time for breakers and their rolling windows
pub trait TimeSource: Send + Sync + std::fmt::Debug {
    /// Time elapsed since the source's anchor
    fn now(&self) -> Duration;
}

/// Real monotonic clock anchored at creation
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start_time: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Manually driven clock
///
/// Time only moves when `advance` or `set` is called, which makes window
/// eviction and sleep-window expiry reproducible in tests.
///
/// # Example
///
/// ```rust
/// use circuit_engine::{ManualClock, TimeSource};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_millis(1500));
/// assert_eq!(clock.now(), Duration::from_millis(1500));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading zero
    pub fn new() -> Self {
        Self::starting_at(Duration::ZERO)
    }

    /// Create a clock reading `start`
    pub fn starting_at(start: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(duration_to_nanos(start)),
        }
    }

    /// Move time forward by `delta`
    pub fn advance(&self, delta: Duration) {
        let delta = duration_to_nanos(delta);
        let _ = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(delta))
            });
    }

    /// Jump to an absolute reading (may move backwards)
    pub fn set(&self, now: Duration) {
        self.nanos.store(duration_to_nanos(now), Ordering::Release);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();

        let time1 = clock.now();
        std::thread::sleep(Duration::from_millis(10));
        let time2 = clock.now();

        assert!(time2 > time1);
    }

    #[test]
    fn test_manual_clock_only_moves_when_told() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance(Duration::from_millis(250));
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), Duration::from_millis(500));

        clock.set(Duration::from_secs(2));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_manual_clock_saturates() {
        let clock = ManualClock::starting_at(Duration::from_nanos(u64::MAX - 1));
        clock.advance(Duration::from_secs(10));

        assert_eq!(clock.now(), Duration::from_nanos(u64::MAX));
    }
}
