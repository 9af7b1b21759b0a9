//! Read-only views of a breaker
//!
//! Everything here is a copy taken under the breaker's lock. Producing a
//! snapshot never changes breaker state, so telemetry can poll as often as
//! it likes.

use crate::window::WindowSnapshot;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Circuit phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Calls pass through, outcomes accumulate
    Closed,
    /// Calls are short-circuited until the sleep window elapses
    Open,
    /// A limited number of probe calls test the dependency
    HalfOpen,
}

impl Phase {
    /// Map a state machine state name; the machine only has these three states
    pub(crate) fn from_state_name(name: &str) -> Self {
        match name {
            "Closed" => Phase::Closed,
            "Open" => Phase::Open,
            "HalfOpen" => Phase::HalfOpen,
            other => unreachable!("unknown circuit state {other:?}"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Closed => "Closed",
            Phase::Open => "Open",
            Phase::HalfOpen => "HalfOpen",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransitionCause {
    /// Error rate or failure count crossed the threshold
    Tripped,
    /// Sleep window elapsed and a call asked for admission
    SleepWindowElapsed,
    /// Enough probes succeeded
    ProbeSucceeded,
    /// A probe failed or timed out
    ProbeFailed,
    /// `force_open` / `force_close`
    Forced,
}

/// A single phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    /// Breaker clock reading at the transition
    pub at: Duration,
    pub cause: TransitionCause,
}

/// Point-in-time copy of a breaker's state and statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub phase: Phase,
    pub window: WindowSnapshot,
    /// When the circuit last opened (Open phase only)
    pub opened_at: Option<Duration>,
    /// Sleep window in force for the current Open phase, jitter applied
    pub sleep_window: Option<Duration>,
    /// Open and past its sleep window: the next call will probe
    pub probe_eligible: bool,
    pub probes_in_flight: usize,
    pub probe_limit: usize,
    /// Consecutive successful probes in the current HalfOpen phase
    pub probe_successes: usize,
    /// Failures (including timeouts) since the last success
    pub consecutive_failures: usize,
    /// Phase changes since the breaker was created
    pub transitions: u64,
    pub last_transition: Option<Transition>,
}
