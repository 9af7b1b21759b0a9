//! Transition hooks
//!
//! Hooks run after the breaker has released its lock, so they may freely
//! call back into the breaker (for example to read `stats()`).

use crate::stats::{Phase, Transition, TransitionCause};
use std::sync::Arc;

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks for circuit breaker transitions
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<Hook>,
    pub on_close: Option<Hook>,
    pub on_half_open: Option<Hook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a transition and run the hook for the phase entered
    pub(crate) fn dispatch(&self, circuit: &str, transition: &Transition) {
        let forced = transition.cause == TransitionCause::Forced;
        match transition.to {
            Phase::Open if forced => {
                tracing::warn!(circuit, from = %transition.from, "circuit forced open");
            }
            Phase::Open => {
                tracing::warn!(
                    circuit,
                    from = %transition.from,
                    cause = ?transition.cause,
                    "circuit opened"
                );
            }
            Phase::HalfOpen => {
                tracing::info!(circuit, "circuit half-open, probing dependency");
            }
            Phase::Closed if forced => {
                tracing::warn!(circuit, from = %transition.from, "circuit forced closed");
            }
            Phase::Closed => {
                tracing::info!(circuit, "circuit closed, normal operation resumed");
            }
        }

        let hook = match transition.to {
            Phase::Open => &self.on_open,
            Phase::HalfOpen => &self.on_half_open,
            Phase::Closed => &self.on_close,
        };
        if let Some(callback) = hook {
            callback(circuit);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
