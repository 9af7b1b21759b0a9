//! Error types for circuit breaker operations

use std::time::Duration;
use thiserror::Error;

/// Errors returned by `CircuitBreaker::call`
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit is open, calls are being rejected
    #[error("Circuit '{circuit}' is open (opened at {opened_at:?})")]
    Open { circuit: String, opened_at: Duration },

    /// Every half-open probe slot is taken
    #[error("Circuit '{circuit}' half-open probe limit reached (limit: {limit})")]
    HalfOpenLimitReached { circuit: String, limit: usize },

    /// Bulkhead is at capacity, cannot acquire permit
    #[error("Circuit '{circuit}' bulkhead is full (limit: {limit})")]
    BulkheadFull { circuit: String, limit: usize },

    /// The operation did not finish before the deadline
    #[error("Circuit '{circuit}' call timed out after {after:?}")]
    Timeout { circuit: String, after: Duration },

    /// The operation panicked; the panic was contained
    #[error("Circuit '{circuit}' operation panicked")]
    Panicked { circuit: String },

    /// No worker thread could be started for a call with a deadline
    #[error("Circuit '{circuit}' could not start a worker thread")]
    WorkerUnavailable {
        circuit: String,
        #[source]
        source: std::io::Error,
    },

    /// The wrapped operation failed
    #[error("Circuit execution failed: {0}")]
    Execution(E),

    /// The fallback ran and failed
    #[error("Circuit fallback failed: {0}")]
    Fallback(E),
}

impl<E> CircuitError<E> {
    /// The call was denied without running the operation
    pub fn is_short_circuited(&self) -> bool {
        matches!(
            self,
            CircuitError::Open { .. }
                | CircuitError::HalfOpenLimitReached { .. }
                | CircuitError::BulkheadFull { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CircuitError::Timeout { .. })
    }

    /// The error returned by the operation or the fallback, if any
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) | CircuitError::Fallback(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid breaker configuration, reported at construction time
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("error threshold must be within 0..=100, got {0}")]
    ErrorThresholdOutOfRange(f64),

    #[error("max half-open probes must be at least 1")]
    NoHalfOpenProbes,

    #[error("success threshold must be at least 1")]
    ZeroSuccessThreshold,

    #[error("bucket count must be at least 1")]
    NoBuckets,

    #[error("window duration must be non-zero")]
    EmptyWindow,

    #[error("window of {window:?} cannot be split into {buckets} equal buckets")]
    UnevenBuckets { window: Duration, buckets: usize },

    #[error("jitter factor must be within 0.0..=1.0, got {0}")]
    JitterOutOfRange(f64),

    #[error("max concurrent calls must be at least 1")]
    ZeroConcurrency,

    #[error("failure threshold must be at least 1")]
    ZeroFailureThreshold,
}
