//! Rolling window of call outcomes
//!
//! The window is a fixed ring of `bucket_count` buckets, each covering one
//! slice of `bucket_width`. A timestamp `t` belongs to slice
//! `floor(t / bucket_width)`, so every bucket spans `[start, start + width)`.
//! At time `now` the active window is the `bucket_count` most recent slices
//! ending with the slice containing `now`.
//!
//! Reads never mutate: `snapshot` only aggregates buckets whose slice is still
//! inside the window, stale buckets are zeroed lazily by the next `record`.

use crate::{Outcome, Sample};
use parking_lot::RwLock;
use serde::Serialize;
use std::time::Duration;

/// Number of latency bins kept per bucket
pub const LATENCY_BINS: usize = 32;

/// Log2 latency histogram over microseconds
///
/// Bin 0 holds sub-microsecond calls, bin `k` holds calls in
/// `[2^(k-1), 2^k)` microseconds, the last bin is open-ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyHistogram {
    bins: [u64; LATENCY_BINS],
}

impl LatencyHistogram {
    fn bin_for(duration: Duration) -> usize {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        if micros == 0 {
            return 0;
        }
        let bits = (u64::BITS - micros.leading_zeros()) as usize;
        bits.min(LATENCY_BINS - 1)
    }

    fn upper_edge(bin: usize) -> Duration {
        Duration::from_micros(1u64 << bin)
    }

    fn record(&mut self, duration: Duration) {
        self.bins[Self::bin_for(duration)] += 1;
    }

    fn merge(&mut self, other: &Self) {
        for (mine, theirs) in self.bins.iter_mut().zip(other.bins.iter()) {
            *mine += theirs;
        }
    }

    /// Total number of recorded latencies
    pub fn count(&self) -> u64 {
        self.bins.iter().sum()
    }

    /// Upper edge of the bin holding the `p`-th percentile (0-100)
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        let total = self.count();
        if total == 0 {
            return None;
        }

        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
        let rank = ((p / 100.0) * total as f64).ceil().max(1.0) as u64;

        let mut seen = 0;
        for (bin, count) in self.bins.iter().enumerate() {
            seen += count;
            if seen >= rank {
                return Some(Self::upper_edge(bin));
            }
        }
        Some(Self::upper_edge(LATENCY_BINS - 1))
    }
}

/// Aggregated outcomes for one time slice
#[derive(Debug, Clone, Default)]
struct Bucket {
    slice: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,
    short_circuited: u64,
    total_duration: Duration,
    min_duration: Option<Duration>,
    max_duration: Option<Duration>,
    latency: LatencyHistogram,
}

impl Bucket {
    fn reset(&mut self, slice: u64) {
        *self = Bucket {
            slice,
            ..Bucket::default()
        };
    }

    fn add(&mut self, outcome: Outcome, duration: Duration) {
        match outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Failure => self.failures += 1,
            Outcome::Timeout => self.timeouts += 1,
            // Rejected calls never ran, so they carry no latency
            Outcome::ShortCircuited => {
                self.short_circuited += 1;
                return;
            }
        }

        self.total_duration = self.total_duration.saturating_add(duration);
        self.min_duration = Some(self.min_duration.map_or(duration, |d| d.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |d| d.max(duration)));
        self.latency.record(duration);
    }

    fn executed(&self) -> u64 {
        self.successes + self.failures + self.timeouts
    }
}

#[derive(Debug)]
struct Ring {
    slots: Vec<Bucket>,
    /// Most recent slice the ring has advanced to
    head: Option<u64>,
}

impl Ring {
    fn advance(&mut self, slice: u64) {
        let len = self.slots.len() as u64;
        let start = match self.head {
            Some(head) if slice <= head => return,
            Some(head) => (head + 1).max(slice.saturating_sub(len - 1)),
            None => slice.saturating_sub(len - 1),
        };

        for s in start..=slice {
            self.slots[(s % len) as usize].reset(s);
        }
        self.head = Some(slice);
    }
}

/// Per-bucket counts, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    /// Start of the bucket's slice (inclusive)
    pub start: Duration,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub short_circuited: u64,
}

/// Immutable aggregate of the active window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSnapshot {
    /// Executed calls (successes, failures and timeouts)
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    /// Calls rejected without running; not part of `total_requests`
    pub short_circuited_count: u64,
    /// `(failures + timeouts) * 100 / total_requests`, 0 when empty
    pub error_percent: f64,
    pub mean_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    latency: LatencyHistogram,
}

impl WindowSnapshot {
    fn empty() -> Self {
        Self {
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            timeout_count: 0,
            short_circuited_count: 0,
            error_percent: 0.0,
            mean_duration: Duration::ZERO,
            min_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            latency: LatencyHistogram::default(),
        }
    }

    /// Failures plus timeouts
    pub fn error_count(&self) -> u64 {
        self.failure_count + self.timeout_count
    }

    /// No executed calls in the window: insufficient data, not "healthy"
    pub fn is_empty(&self) -> bool {
        self.total_requests == 0
    }

    /// Approximate latency percentile (0-100), `Duration::ZERO` when empty
    pub fn percentile(&self, p: f64) -> Duration {
        self.latency
            .percentile(p)
            .map(|d| d.min(self.max_duration).max(self.min_duration))
            .unwrap_or(Duration::ZERO)
    }

    pub fn latency(&self) -> &LatencyHistogram {
        &self.latency
    }
}

/// Thread-safe bucketed sliding window
#[derive(Debug)]
pub struct RollingWindow {
    bucket_width: Duration,
    ring: RwLock<Ring>,
}

impl RollingWindow {
    /// Create a window of `bucket_count` buckets of `bucket_width` each
    ///
    /// # Panics
    ///
    /// Panics if `bucket_width` is zero or `bucket_count` is 0.
    /// `BreakerConfig::validate` rejects both before a breaker builds its window.
    pub fn new(bucket_width: Duration, bucket_count: usize) -> Self {
        assert!(!bucket_width.is_zero(), "Bucket width must be non-zero");
        assert!(bucket_count > 0, "Bucket count must be greater than 0");

        Self {
            bucket_width,
            ring: RwLock::new(Ring {
                slots: vec![Bucket::default(); bucket_count],
                head: None,
            }),
        }
    }

    pub fn bucket_width(&self) -> Duration {
        self.bucket_width
    }

    pub fn bucket_count(&self) -> usize {
        self.ring.read().slots.len()
    }

    /// Total span covered by the ring
    pub fn window_duration(&self) -> Duration {
        self.bucket_width * self.bucket_count() as u32
    }

    fn slice_of(&self, at: Duration) -> u64 {
        u64::try_from(at.as_nanos() / self.bucket_width.as_nanos()).unwrap_or(u64::MAX)
    }

    fn slice_start(&self, slice: u64) -> Duration {
        let nanos = self.bucket_width.as_nanos() * u128::from(slice);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Add a sample to the bucket covering its timestamp
    ///
    /// Samples older than the active window are dropped.
    pub fn record(&self, sample: Sample) {
        let slice = self.slice_of(sample.timestamp);
        let mut ring = self.ring.write();
        ring.advance(slice);

        let len = ring.slots.len() as u64;
        let slot = &mut ring.slots[(slice % len) as usize];
        if slot.slice == slice {
            slot.add(sample.outcome, sample.duration);
        } else {
            tracing::trace!(slice, "dropping sample older than the window");
        }
    }

    /// Aggregate every bucket still inside the window at `now`
    pub fn snapshot(&self, now: Duration) -> WindowSnapshot {
        let current = self.slice_of(now);
        let ring = self.ring.read();
        let len = ring.slots.len() as u64;

        let mut snapshot = WindowSnapshot::empty();
        let mut total_duration = Duration::ZERO;
        let mut min_duration: Option<Duration> = None;
        let mut max_duration: Option<Duration> = None;

        for bucket in ring
            .slots
            .iter()
            .filter(|b| is_active(b.slice, current, len))
        {
            snapshot.success_count += bucket.successes;
            snapshot.failure_count += bucket.failures;
            snapshot.timeout_count += bucket.timeouts;
            snapshot.short_circuited_count += bucket.short_circuited;
            total_duration = total_duration.saturating_add(bucket.total_duration);
            min_duration = min_of(min_duration, bucket.min_duration);
            max_duration = max_of(max_duration, bucket.max_duration);
            snapshot.latency.merge(&bucket.latency);
        }

        snapshot.total_requests =
            snapshot.success_count + snapshot.failure_count + snapshot.timeout_count;
        if snapshot.total_requests > 0 {
            snapshot.error_percent =
                snapshot.error_count() as f64 * 100.0 / snapshot.total_requests as f64;
            let mean_nanos = total_duration.as_nanos() / u128::from(snapshot.total_requests);
            snapshot.mean_duration =
                Duration::from_nanos(u64::try_from(mean_nanos).unwrap_or(u64::MAX));
        }
        snapshot.min_duration = min_duration.unwrap_or(Duration::ZERO);
        snapshot.max_duration = max_duration.unwrap_or(Duration::ZERO);

        snapshot
    }

    /// Per-bucket counts for the active window, oldest first
    pub fn bucket_counts(&self, now: Duration) -> Vec<BucketCounts> {
        let current = self.slice_of(now);
        let ring = self.ring.read();
        let len = ring.slots.len() as u64;

        let mut counts: Vec<BucketCounts> = ring
            .slots
            .iter()
            .filter(|b| is_active(b.slice, current, len))
            .filter(|b| b.executed() > 0 || b.short_circuited > 0)
            .map(|b| BucketCounts {
                start: self.slice_start(b.slice),
                successes: b.successes,
                failures: b.failures,
                timeouts: b.timeouts,
                short_circuited: b.short_circuited,
            })
            .collect();
        counts.sort_by_key(|c| c.start);
        counts
    }

    /// Zero every bucket
    pub fn clear(&self) {
        let mut ring = self.ring.write();
        for slot in ring.slots.iter_mut() {
            slot.reset(0);
        }
        ring.head = None;
    }
}

fn is_active(slice: u64, current: u64, len: u64) -> bool {
    slice <= current && slice + len > current
}

fn min_of(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn max_of(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn sample(outcome: Outcome, at: Duration) -> Sample {
        Sample {
            timestamp: at,
            outcome,
            duration: ms(10),
        }
    }

    #[test]
    fn test_empty_window_reports_zero() {
        let window = RollingWindow::new(Duration::from_secs(1), 5);
        let snapshot = window.snapshot(Duration::from_secs(3));

        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.error_percent, 0.0);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.percentile(99.0), Duration::ZERO);
    }

    #[test]
    fn test_record_and_aggregate() {
        let window = RollingWindow::new(Duration::from_secs(1), 5);

        window.record(sample(Outcome::Success, ms(100)));
        window.record(sample(Outcome::Failure, ms(1200)));
        window.record(sample(Outcome::Timeout, ms(2500)));
        window.record(sample(Outcome::Success, ms(2600)));
        window.record(sample(Outcome::ShortCircuited, ms(2700)));

        let snapshot = window.snapshot(ms(3000));
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.success_count, 2);
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.timeout_count, 1);
        assert_eq!(snapshot.short_circuited_count, 1);
        assert_eq!(snapshot.error_count(), 2);
        assert_eq!(snapshot.error_percent, 50.0);
    }

    #[test]
    fn test_bucket_boundary_is_start_inclusive_end_exclusive() {
        let window = RollingWindow::new(Duration::from_secs(1), 5);

        // 999ms lands in slice 0, 1000ms in slice 1
        window.record(sample(Outcome::Failure, ms(999)));
        window.record(sample(Outcome::Success, ms(1000)));

        let buckets = window.bucket_counts(ms(1000));
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].start, Duration::ZERO);
        assert_eq!(buckets[0].failures, 1);
        assert_eq!(buckets[1].start, Duration::from_secs(1));
        assert_eq!(buckets[1].successes, 1);

        // At 4999ms slice 0 is still the oldest active slice
        assert_eq!(window.snapshot(ms(4999)).total_requests, 2);

        // At 5000ms slice 0 has left the window, slice 1 has not
        let snapshot = window.snapshot(ms(5000));
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 1);

        assert_eq!(window.snapshot(ms(6000)).total_requests, 0);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let window = RollingWindow::new(Duration::from_secs(1), 3);
        window.record(sample(Outcome::Failure, ms(100)));

        // Reading far in the future sees nothing...
        assert_eq!(window.snapshot(Duration::from_secs(60)).total_requests, 0);
        // ...but evicts nothing either
        assert_eq!(window.snapshot(ms(500)).total_requests, 1);
        assert_eq!(window.snapshot(ms(500)), window.snapshot(ms(500)));
    }

    #[test]
    fn test_record_evicts_and_reuses_slots() {
        let window = RollingWindow::new(Duration::from_secs(1), 3);

        window.record(sample(Outcome::Failure, ms(100)));
        window.record(sample(Outcome::Failure, ms(1100)));
        // Slice 3 reuses slice 0's slot
        window.record(sample(Outcome::Success, ms(3100)));

        let snapshot = window.snapshot(ms(3100));
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.success_count, 1);

        // A long gap zeroes the whole ring
        window.record(sample(Outcome::Success, Duration::from_secs(100)));
        let snapshot = window.snapshot(Duration::from_secs(100));
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(window.bucket_counts(Duration::from_secs(100)).len(), 1);
    }

    #[test]
    fn test_late_samples_inside_window_are_kept() {
        let window = RollingWindow::new(Duration::from_secs(1), 3);

        window.record(sample(Outcome::Success, ms(2500)));
        window.record(sample(Outcome::Failure, ms(1500)));
        window.record(sample(Outcome::Failure, ms(100)));

        let snapshot = window.snapshot(ms(2500));
        assert_eq!(snapshot.failure_count, 2);

        // Older than the window once the ring has moved on
        window.record(sample(Outcome::Success, ms(4100)));
        window.record(sample(Outcome::Failure, ms(900)));
        assert_eq!(window.snapshot(ms(4100)).failure_count, 0);
    }

    #[test]
    fn test_durations_and_percentiles() {
        let window = RollingWindow::new(Duration::from_secs(1), 5);

        for millis in [10, 20, 30, 40] {
            window.record(Sample {
                timestamp: ms(100),
                outcome: Outcome::Success,
                duration: ms(millis),
            });
        }
        window.record(Sample {
            timestamp: ms(100),
            outcome: Outcome::Failure,
            duration: ms(500),
        });

        let snapshot = window.snapshot(ms(200));
        assert_eq!(snapshot.mean_duration, ms(120));
        assert_eq!(snapshot.min_duration, ms(10));
        assert_eq!(snapshot.max_duration, ms(500));

        let p50 = snapshot.percentile(50.0);
        assert!(p50 >= ms(30) && p50 <= ms(66), "p50 was {:?}", p50);
        assert_eq!(snapshot.percentile(100.0), ms(500));
        assert_eq!(snapshot.percentile(0.0), snapshot.percentile(1.0));
    }

    #[test]
    fn test_short_circuits_carry_no_latency() {
        let window = RollingWindow::new(Duration::from_secs(1), 2);
        window.record(Sample {
            timestamp: ms(10),
            outcome: Outcome::ShortCircuited,
            duration: Duration::from_secs(5),
        });

        let snapshot = window.snapshot(ms(10));
        assert_eq!(snapshot.short_circuited_count, 1);
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.max_duration, Duration::ZERO);
        assert_eq!(snapshot.latency().count(), 0);
    }

    #[test]
    fn test_clear() {
        let window = RollingWindow::new(Duration::from_secs(1), 5);
        window.record(sample(Outcome::Failure, ms(100)));
        window.record(sample(Outcome::Failure, ms(1100)));

        window.clear();

        assert_eq!(window.snapshot(ms(1100)).total_requests, 0);
        window.record(sample(Outcome::Success, ms(1200)));
        assert_eq!(window.snapshot(ms(1200)).total_requests, 1);
    }

    #[test]
    #[should_panic(expected = "Bucket count must be greater than 0")]
    fn test_zero_buckets() {
        RollingWindow::new(Duration::from_secs(1), 0);
    }

    fn outcome_from(index: u8) -> Outcome {
        match index % 4 {
            0 => Outcome::Success,
            1 => Outcome::Failure,
            2 => Outcome::Timeout,
            _ => Outcome::ShortCircuited,
        }
    }

    proptest! {
        #[test]
        fn prop_window_matches_trailing_totals(
            steps in prop::collection::vec((0u64..700, 0u8..4), 1..120),
            bucket_count in 1usize..8,
            read_delay in 0u64..3000,
        ) {
            let width = ms(250);
            let window = RollingWindow::new(width, bucket_count);

            let mut now = Duration::ZERO;
            let mut history = Vec::new();
            for (gap, kind) in steps {
                now += ms(gap);
                let outcome = outcome_from(kind);
                window.record(sample(outcome, now));
                history.push((now, outcome));
            }
            let read_at = now + ms(read_delay);

            let current = (read_at.as_nanos() / width.as_nanos()) as u64;
            let len = bucket_count as u64;
            let in_window: Vec<Outcome> = history
                .iter()
                .filter(|(at, _)| {
                    let slice = (at.as_nanos() / width.as_nanos()) as u64;
                    slice <= current && slice + len > current
                })
                .map(|(_, outcome)| *outcome)
                .collect();
            let count = |wanted: Outcome| in_window.iter().filter(|o| **o == wanted).count() as u64;

            let snapshot = window.snapshot(read_at);
            prop_assert_eq!(snapshot.success_count, count(Outcome::Success));
            prop_assert_eq!(snapshot.failure_count, count(Outcome::Failure));
            prop_assert_eq!(snapshot.timeout_count, count(Outcome::Timeout));
            prop_assert_eq!(snapshot.short_circuited_count, count(Outcome::ShortCircuited));

            let buckets = window.bucket_counts(read_at);
            prop_assert!(buckets.len() <= bucket_count);
            let summed: u64 = buckets.iter().map(|b| b.successes + b.failures + b.timeouts).sum();
            prop_assert_eq!(summed, snapshot.total_requests);
        }
    }
}
