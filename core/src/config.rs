//! Circuit breaker configuration

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker configuration
///
/// Immutable once a breaker is built from it. Every field has a default, so a
/// partial document deserializes cleanly:
///
/// ```rust
/// use circuit_engine::BreakerConfig;
/// use std::time::Duration;
///
/// let config = BreakerConfig {
///     name: "inventory".to_string(),
///     minimum_requests: 10,
///     error_threshold_percent: 50.0,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// assert_eq!(config.bucket_width(), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Circuit name, used in errors, logs and the registry
    pub name: String,

    /// Span of the rolling statistics window
    pub window_duration: Duration,

    /// Number of buckets the window is split into
    /// (`window_duration` must divide evenly)
    pub bucket_count: usize,

    /// Minimum executed calls in the window before the error rate is evaluated
    pub minimum_requests: usize,

    /// Error percentage (0-100) at or above which the circuit opens
    pub error_threshold_percent: f64,

    /// Absolute number of failures in the window that opens the circuit
    /// regardless of `minimum_requests`. If None, only the error rate is used
    pub failure_threshold: Option<usize>,

    /// Sleep window: how long the circuit stays open before probing
    pub open_duration: Duration,

    /// Per-call deadline. `Duration::ZERO` disables it (wait indefinitely)
    pub timeout: Duration,

    /// Concurrent probes admitted while half-open
    pub max_half_open_probes: usize,

    /// Consecutive probe successes needed to close from half-open
    pub success_threshold: usize,

    /// Clear window statistics when a probe closes the circuit
    pub reset_window_on_close: bool,

    /// Jitter factor for the sleep window (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: open_duration * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,

    /// Bulkhead limit on concurrent calls. If None, unlimited
    pub max_concurrent_calls: Option<usize>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            window_duration: Duration::from_secs(10),
            bucket_count: 10,
            minimum_requests: 20,
            error_threshold_percent: 50.0,
            failure_threshold: None,
            open_duration: Duration::from_secs(5),
            timeout: Duration::ZERO,
            max_half_open_probes: 1,
            success_threshold: 1,
            reset_window_on_close: true,
            jitter_factor: 0.0,
            max_concurrent_calls: None,
        }
    }
}

impl BreakerConfig {
    /// Default configuration for the named circuit
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Reject values the engine cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.error_threshold_percent) {
            return Err(ConfigError::ErrorThresholdOutOfRange(
                self.error_threshold_percent,
            ));
        }
        if self.max_half_open_probes < 1 {
            return Err(ConfigError::NoHalfOpenProbes);
        }
        if self.success_threshold < 1 {
            return Err(ConfigError::ZeroSuccessThreshold);
        }
        if self.bucket_count < 1 {
            return Err(ConfigError::NoBuckets);
        }
        if self.window_duration.is_zero() {
            return Err(ConfigError::EmptyWindow);
        }
        let buckets = self.bucket_count as u128;
        let window_nanos = self.window_duration.as_nanos();
        if window_nanos % buckets != 0 || window_nanos < buckets {
            return Err(ConfigError::UnevenBuckets {
                window: self.window_duration,
                buckets: self.bucket_count,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange(self.jitter_factor));
        }
        if self.max_concurrent_calls == Some(0) {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.failure_threshold == Some(0) {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        Ok(())
    }

    /// Width of one bucket (`window_duration / bucket_count`)
    pub fn bucket_width(&self) -> Duration {
        let nanos = self.window_duration.as_nanos() / self.bucket_count.max(1) as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// The call deadline, or None when timeouts are disabled
    pub fn deadline(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}
