//! circuit-engine - Circuit breaker engine over a bucketed rolling window
//!
//! This crate provides:
//! - A rolling window of call outcomes split into fixed-width time buckets
//! - A state machine for the breaker lifecycle (Closed → Open → HalfOpen)
//! - Per-call deadlines, half-open probe limits and an optional bulkhead
//! - A registry of named breakers shared across threads
//!
//! Time comes from a [`TimeSource`], so the whole engine can be driven by a
//! [`ManualClock`] in tests.
//!
//! # Example
//!
//! ```rust
//! use circuit_engine::CircuitBreaker;
//! use std::time::Duration;
//!
//! let circuit = CircuitBreaker::builder("my_service")
//!     .window(Duration::from_secs(10), 10)
//!     .minimum_requests(20)
//!     .error_threshold_percent(50.0)
//!     .open_duration(Duration::from_secs(5))
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build()
//!     .expect("valid configuration");
//!
//! // Execute with circuit protection
//! let result = circuit.call(|| {
//!     // Your service call here
//!     Ok::<_, String>("success")
//! });
//! assert!(result.is_ok());
//!
//! // Check circuit state
//! if circuit.is_open() {
//!     println!("Circuit is open, skipping call");
//! }
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod deadline;
pub mod errors;
pub mod permits;
pub mod registry;
pub mod stats;
pub mod window;

pub use builder::CircuitBuilder;
pub use callbacks::Callbacks;
pub use circuit::{CallOptions, CircuitBreaker, FallbackContext, FallbackReason, IntoCallOptions};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{ManualClock, MonotonicClock, TimeSource};
pub use config::BreakerConfig;
pub use deadline::CancelToken;
pub use errors::{CircuitError, ConfigError};
pub use permits::{Permit, PermitPool};
pub use registry::Registry;
pub use stats::{BreakerStats, Phase, Transition, TransitionCause};
pub use window::{BucketCounts, LatencyHistogram, RollingWindow, WindowSnapshot};

use serde::Serialize;
use std::time::Duration;

/// How a single call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    /// Rejected by the breaker without running
    ShortCircuited,
}

impl Outcome {
    /// Failures and timeouts both count against the error rate
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Failure | Outcome::Timeout)
    }
}

/// A single outcome recorded into the rolling window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Clock reading when the call completed
    pub timestamp: Duration,
    pub outcome: Outcome,
    /// How long the call ran
    pub duration: Duration,
}
