//! Counting permits for concurrency limits
//!
//! A `PermitPool` hands out at most `limit` permits at a time. It backs both
//! the half-open probe limit and the optional bulkhead. Permits are returned
//! when the `Permit` guard drops, including on panic or when a timed-out
//! caller walks away from its operation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free pool of `limit` permits
#[derive(Debug)]
pub struct PermitPool {
    limit: usize,
    acquired: AtomicUsize,
}

impl PermitPool {
    /// Create a pool with `limit` permits
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "Permit limit must be greater than 0");
        Self {
            limit,
            acquired: AtomicUsize::new(0),
        }
    }

    /// Take a permit if one is free, without blocking
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        self.acquired
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.limit).then_some(current + 1)
            })
            .ok()
            .map(|_| Permit {
                pool: Arc::clone(self),
            })
    }

    /// Permits currently held
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.acquired())
    }

    fn release(&self) {
        self.acquired.fetch_sub(1, Ordering::Release);
    }
}

impl Default for PermitPool {
    fn default() -> Self {
        Self::new(1)
    }
}

/// A held permit, released on drop
#[derive(Debug)]
pub struct Permit {
    pool: Arc<PermitPool>,
}

impl Permit {
    /// Whether this permit was issued by `pool`
    pub fn is_from(&self, pool: &Arc<PermitPool>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.pool.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_acquire_and_release() {
        let pool = Arc::new(PermitPool::new(2));
        assert_eq!(pool.available(), 2);

        let first = pool.try_acquire().expect("first permit");
        let second = pool.try_acquire().expect("second permit");
        assert!(pool.try_acquire().is_none(), "pool should be exhausted");
        assert_eq!(pool.acquired(), 2);

        drop(first);
        assert_eq!(pool.available(), 1);
        let third = pool.try_acquire();
        assert!(third.is_some(), "released permit should be reusable");

        drop(second);
        drop(third);
        assert_eq!(pool.acquired(), 0);
    }

    #[test]
    fn test_permit_knows_its_pool() {
        let pool = Arc::new(PermitPool::new(1));
        let other = Arc::new(PermitPool::new(1));

        let permit = pool.try_acquire().expect("permit");
        assert!(permit.is_from(&pool));
        assert!(!permit.is_from(&other));
    }

    #[test]
    fn test_never_exceeds_limit_under_contention() {
        let pool = Arc::new(PermitPool::new(3));
        let barrier = Arc::new(Barrier::new(12));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let permit = pool.try_acquire();
                    let held = pool.acquired();
                    // Keep every permit alive until all threads have tried
                    barrier.wait();
                    (permit.is_some(), held)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let granted = results.iter().filter(|(ok, _)| *ok).count();

        assert_eq!(granted, 3);
        assert!(results.iter().all(|(_, held)| *held <= 3));
        assert_eq!(pool.acquired(), 0);
    }

    #[test]
    fn test_permit_released_on_panic() {
        let pool = Arc::new(PermitPool::new(1));

        let worker_pool = Arc::clone(&pool);
        let result = std::panic::catch_unwind(move || {
            let _permit = worker_pool.try_acquire().unwrap();
            panic!("Simulated panic");
        });

        assert!(result.is_err());
        assert_eq!(pool.acquired(), 0);
    }

    #[test]
    #[should_panic(expected = "Permit limit must be greater than 0")]
    fn test_zero_limit() {
        PermitPool::new(0);
    }
}
