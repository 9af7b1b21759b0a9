//! Named breakers shared across threads
//!
//! A registry is an explicit value: create one, share it (usually behind an
//! `Arc`), and ask it for breakers by name. Each name gets exactly one
//! breaker for the registry's lifetime unless it is removed.

use crate::{
    circuit::CircuitBreaker,
    clock::{MonotonicClock, TimeSource},
    config::BreakerConfig,
    errors::ConfigError,
    stats::BreakerStats,
};
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::Arc;

/// Map of circuit name to breaker
pub struct Registry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    clock: Arc<dyn TimeSource>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    /// Registry whose breakers all share `clock`
    pub fn with_clock(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            breakers: DashMap::new(),
            clock,
        }
    }

    /// Breaker registered under `name`, creating it from `config` on first use
    ///
    /// `config` is only consulted when the breaker does not exist yet; its
    /// `name` field is replaced by `name`.
    pub fn get_or_create(
        &self,
        name: &str,
        config: BreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        if let Some(existing) = self.breakers.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        // Construct under the shard lock so racing callers share one breaker
        match self.breakers.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let config = BreakerConfig {
                    name: name.to_string(),
                    ..config
                };
                let breaker = Arc::new(CircuitBreaker::with_clock(
                    config,
                    Arc::clone(&self.clock),
                )?);
                tracing::debug!(circuit = name, "registered circuit breaker");
                entry.insert(Arc::clone(&breaker));
                Ok(breaker)
            }
        }
    }

    /// Existing breaker, if any; never creates one
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the registry's handle; callers holding the `Arc` keep theirs
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Stats for every registered breaker, sorted by name
    pub fn stats(&self) -> Vec<BreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stats: Vec<BreakerStats> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("breakers", &self.names())
            .field("clock", &self.clock)
            .finish()
    }
}
