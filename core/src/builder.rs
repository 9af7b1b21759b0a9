//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::Callbacks,
    circuit::CircuitBreaker,
    classifier::FailureClassifier,
    clock::{MonotonicClock, TimeSource},
    config::BreakerConfig,
    errors::ConfigError,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    config: BreakerConfig,
    clock: Option<Arc<dyn TimeSource>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: BreakerConfig::named(name),
            clock: None,
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Start from an existing configuration, keeping the builder's name
    pub fn config(mut self, config: BreakerConfig) -> Self {
        let name = std::mem::take(&mut self.config.name);
        self.config = BreakerConfig { name, ..config };
        self
    }

    /// Set the rolling window length and how many buckets it is split into
    pub fn window(mut self, duration: Duration, buckets: usize) -> Self {
        self.config.window_duration = duration;
        self.config.bucket_count = buckets;
        self
    }

    /// Set minimum number of requests in the window before the error rate is evaluated
    pub fn minimum_requests(mut self, requests: usize) -> Self {
        self.config.minimum_requests = requests;
        self
    }

    /// Set the error percentage (0-100) at which the circuit opens
    pub fn error_threshold_percent(mut self, percent: f64) -> Self {
        self.config.error_threshold_percent = percent;
        self
    }

    /// Set the absolute failure threshold (failures in the window that open the circuit)
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.config.failure_threshold = Some(threshold);
        self
    }

    /// Disable absolute failure threshold (use only rate-based)
    pub fn disable_failure_threshold(mut self) -> Self {
        self.config.failure_threshold = None;
        self
    }

    /// Set how long the circuit stays open before probing
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    /// Set the per-call deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Run operations inline with no deadline
    pub fn disable_timeout(mut self) -> Self {
        self.config.timeout = Duration::ZERO;
        self
    }

    /// Set how many probes may run concurrently while half-open
    pub fn max_half_open_probes(mut self, probes: usize) -> Self {
        self.config.max_half_open_probes = probes;
        self
    }

    /// Set the success threshold (consecutive probe successes needed to close)
    pub fn success_threshold(mut self, threshold: usize) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Whether closing the circuit discards the window's history
    pub fn reset_window_on_close(mut self, reset: bool) -> Self {
        self.config.reset_window_on_close = reset;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: open_duration * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Set maximum concurrency limit (bulkheading)
    ///
    /// When set, the circuit breaker rejects calls with `BulkheadFull` once
    /// `limit` calls are running. A limit of 0 fails validation in `build()`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use circuit_engine::CircuitBreaker;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .max_concurrency(10) // Allow max 10 concurrent calls
    ///     .build()
    ///     .unwrap();
    ///
    /// let result = circuit.call(|| Ok::<_, String>("success"));
    /// assert!(result.is_ok());
    /// ```
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrent_calls = Some(limit);
        self
    }

    /// Drive the breaker from a custom time source
    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier to filter which errors should trip the circuit
    ///
    /// The classifier determines whether a given error should count toward
    /// opening the circuit. Use this to ignore "expected" errors like validation
    /// failures or client errors (4xx), while still tripping on server errors (5xx).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use circuit_engine::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Only trip on slow errors
    ///         ctx.duration > Duration::from_secs(1)
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        CircuitBreaker::assemble(self.config, clock, self.failure_classifier, self.callbacks)
    }
}

impl std::fmt::Debug for CircuitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBuilder")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}
