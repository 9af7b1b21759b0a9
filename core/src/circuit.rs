//! Circuit breaker implementation using state machines
//!
//! The phase machine is a `state_machines` dynamic machine. Guards read the
//! shared rolling window through the machine context, so a transition is
//! decided from the same statistics `stats()` reports.
//!
//! Locking: every breaker owns one mutex around its phase machine. The
//! window's own lock is only taken while that mutex is held (or for a pure
//! read), which keeps "record outcome" and "re-evaluate phase" atomic with
//! respect to each other. No lock is held while the operation runs.

use crate::{
    Outcome, Sample,
    callbacks::Callbacks,
    classifier::{FailureClassifier, FailureContext},
    clock::{MonotonicClock, TimeSource},
    config::BreakerConfig,
    deadline::{self, Attempt, CancelToken, OperationFn},
    errors::{CircuitError, ConfigError},
    permits::{Permit, PermitPool},
    stats::{BreakerStats, Phase, Transition, TransitionCause},
    window::{BucketCounts, RollingWindow},
};
use parking_lot::Mutex;
use state_machines::state_machine;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Why a fallback is being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The breaker refused the call (open, probe limit, bulkhead)
    Rejected,
    /// The operation returned an error
    OperationFailed,
    /// The operation missed its deadline
    TimedOut,
    /// The operation panicked
    Panicked,
}

/// Context provided to fallback closures
#[derive(Debug, Clone)]
pub struct FallbackContext {
    pub circuit_name: String,
    /// Phase at the time the fallback runs
    pub phase: Phase,
    pub reason: FallbackReason,
    /// When the circuit opened, if it is open
    pub opened_at: Option<Duration>,
}

/// Type alias for fallback function
pub type FallbackFn<T, E> = Box<dyn FnOnce(&FallbackContext) -> Result<T, E> + Send>;

/// Options for circuit breaker calls
pub struct CallOptions<T, E> {
    /// Called when the breaker rejects the call or the operation fails
    pub fallback: Option<FallbackFn<T, E>>,
}

impl<T, E> Default for CallOptions<T, E> {
    fn default() -> Self {
        Self { fallback: None }
    }
}

impl<T, E> CallOptions<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fallback function
    pub fn with_fallback<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&FallbackContext) -> Result<T, E> + Send + 'static,
    {
        self.fallback = Some(Box::new(f));
        self
    }
}

/// Conversion into an operation plus options - allows flexible call() API
pub trait IntoCallOptions<T, E> {
    fn into_call_options(self) -> (OperationFn<T, E>, CallOptions<T, E>);
}

/// Plain closures
impl<T, E, F> IntoCallOptions<T, E> for F
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    fn into_call_options(self) -> (OperationFn<T, E>, CallOptions<T, E>) {
        (Box::new(move |_: &CancelToken| self()), CallOptions::default())
    }
}

/// (closure, CallOptions) tuples
impl<T, E, F> IntoCallOptions<T, E> for (F, CallOptions<T, E>)
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    fn into_call_options(self) -> (OperationFn<T, E>, CallOptions<T, E>) {
        let (operation, options) = self;
        (Box::new(move |_: &CancelToken| operation()), options)
    }
}

/// Circuit breaker context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: BreakerConfig,
    pub clock: Arc<dyn TimeSource>,
    pub window: Arc<RollingWindow>,
    pub failure_classifier: Option<Arc<dyn FailureClassifier>>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        let config = BreakerConfig::default();
        let window = RollingWindow::new(config.bucket_width(), config.bucket_count);
        Self {
            name: String::new(),
            config,
            clock: Arc::new(MonotonicClock::new()),
            window: Arc::new(window),
            failure_classifier: None,
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("window", &self.window)
            .field(
                "failure_classifier",
                &self
                    .failure_classifier
                    .as_ref()
                    .map(|_| "<dyn FailureClassifier>"),
            )
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: Duration,
    /// Sleep window for this Open phase, jitter applied
    pub sleep_window: Duration,
}

impl OpenData {
    /// Open covers `[opened_at, opened_at + sleep_window]`; probing starts after it
    fn sleep_window_passed(&self, now: Duration) -> bool {
        now.checked_sub(self.opened_at)
            .is_some_and(|elapsed| elapsed > self.sleep_window)
    }
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    /// Probe slots for this HalfOpen phase
    pub probes: Arc<PermitPool>,
    pub consecutive_successes: usize,
}

// Define the circuit breaker state machine with dynamic mode
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,  // Enable dynamic mode for runtime state transitions

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: Closed, to: Open }
        }
        attempt_reset {
            guards: [sleep_window_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
        reopen {
            transition: { from: HalfOpen, to: Open }
        }
        force_open {
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        force_close {
            transition: { from: [Open, HalfOpen], to: Closed }
        }
    }
}

impl Circuit<Closed> {
    /// Error rate (with enough traffic) or absolute failure count exceeded
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        let window = ctx.window.snapshot(ctx.clock.now());

        if let Some(threshold) = ctx.config.failure_threshold
            && window.error_count() >= threshold as u64
        {
            return true;
        }

        window.total_requests > 0
            && window.total_requests >= ctx.config.minimum_requests as u64
            && window.error_percent >= ctx.config.error_threshold_percent
    }
}

impl Circuit<Open> {
    fn sleep_window_elapsed(&self, ctx: &CircuitContext) -> bool {
        self.state_data_open()
            .is_some_and(|data| data.sleep_window_passed(ctx.clock.now()))
    }
}

impl Circuit<HalfOpen> {
    fn should_close(&self, ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .is_some_and(|data| data.consecutive_successes >= ctx.config.success_threshold)
    }
}

/// Sleep window for a fresh Open phase
///
/// Jitter only lengthens the window: the chrono-machines delay lands in
/// `[open_duration * (1 - j), open_duration]`, and the shortfall from
/// `open_duration` is added on top, giving `[open_duration, open_duration * (1 + j)]`.
fn sleep_window(config: &BreakerConfig) -> Duration {
    if config.jitter_factor > 0.0 {
        let base_delay_ms = u64::try_from(config.open_duration.as_millis()).unwrap_or(u64::MAX);
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms,
            multiplier: 1.0,
            max_delay_ms: base_delay_ms,
        };
        let timeout_ms = policy.calculate_delay(1, config.jitter_factor) as u64;
        let extra = Duration::from_millis(base_delay_ms.saturating_sub(timeout_ms));
        config.open_duration.saturating_add(extra)
    } else {
        config.open_duration
    }
}

/// Phase machine plus bookkeeping, guarded by the breaker mutex
struct BreakerState {
    machine: DynamicCircuit,
    consecutive_failures: usize,
    transitions: u64,
    last_transition: Option<Transition>,
}

impl BreakerState {
    fn new(context: CircuitContext) -> Self {
        Self {
            machine: DynamicCircuit::new(context),
            consecutive_failures: 0,
            transitions: 0,
            last_transition: None,
        }
    }

    fn phase(&self) -> Phase {
        Phase::from_state_name(self.machine.current_state())
    }

    fn open_data(&self) -> Option<&OpenData> {
        if self.phase() == Phase::Open {
            self.machine.open_data()
        } else {
            None
        }
    }

    fn half_open_data(&self) -> Option<&HalfOpenData> {
        if self.phase() == Phase::HalfOpen {
            self.machine.half_open_data()
        } else {
            None
        }
    }

    fn note(&mut self, from: Phase, to: Phase, at: Duration, cause: TransitionCause) -> Transition {
        let transition = Transition {
            from,
            to,
            at,
            cause,
        };
        self.transitions += 1;
        self.last_transition = Some(transition);
        transition
    }

    /// Open-state bookkeeping after entering (or re-entering) Open
    fn mark_open(
        &mut self,
        config: &BreakerConfig,
        now: Duration,
        from: Phase,
        cause: TransitionCause,
    ) -> Transition {
        if let Some(data) = self.machine.open_data_mut() {
            data.opened_at = now;
            data.sleep_window = sleep_window(config);
        }
        self.note(from, Phase::Open, now, cause)
    }

    /// Install a fresh probe pool after entering HalfOpen
    fn mark_half_open(&mut self, config: &BreakerConfig, now: Duration) -> Transition {
        if let Some(data) = self.machine.half_open_data_mut() {
            data.probes = Arc::new(PermitPool::new(config.max_half_open_probes));
            data.consecutive_successes = 0;
        }
        self.note(
            Phase::Open,
            Phase::HalfOpen,
            now,
            TransitionCause::SleepWindowElapsed,
        )
    }

    /// Whether `probe` belongs to the current HalfOpen phase
    fn is_current_probe(&self, probe: Option<&Permit>) -> bool {
        match (probe, self.half_open_data()) {
            (Some(permit), Some(data)) => permit.is_from(&data.probes),
            _ => false,
        }
    }
}

/// A call that got past admission
struct Admission {
    started: Duration,
    probe: Option<Permit>,
    bulkhead: Option<Permit>,
}

#[derive(Debug)]
enum Rejection {
    Open { opened_at: Duration },
    ProbeLimit { limit: usize },
    Bulkhead { limit: usize },
}

impl Rejection {
    fn into_error<E>(self, circuit: &str) -> CircuitError<E> {
        let circuit = circuit.to_string();
        match self {
            Rejection::Open { opened_at } => CircuitError::Open { circuit, opened_at },
            Rejection::ProbeLimit { limit } => {
                CircuitError::HalfOpenLimitReached { circuit, limit }
            }
            Rejection::Bulkhead { limit } => CircuitError::BulkheadFull { circuit, limit },
        }
    }
}

/// Circuit breaker public API
///
/// All methods take `&self`; share a breaker between threads with `Arc`
/// (or through a [`Registry`](crate::Registry)).
pub struct CircuitBreaker {
    context: CircuitContext,
    callbacks: Callbacks,
    bulkhead: Option<Arc<PermitPool>>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker on the real monotonic clock (use builder() for more options)
    pub fn new(config: BreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a breaker driven by `clock`
    pub fn with_clock(
        config: BreakerConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        Self::assemble(config, clock, None, Callbacks::new())
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    pub(crate) fn assemble(
        config: BreakerConfig,
        clock: Arc<dyn TimeSource>,
        failure_classifier: Option<Arc<dyn FailureClassifier>>,
        callbacks: Callbacks,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let window = Arc::new(RollingWindow::new(
            config.bucket_width(),
            config.bucket_count,
        ));
        let bulkhead = config
            .max_concurrent_calls
            .map(|limit| Arc::new(PermitPool::new(limit)));
        let context = CircuitContext {
            name: config.name.clone(),
            config,
            clock,
            window,
            failure_classifier,
        };

        Ok(Self {
            state: Mutex::new(BreakerState::new(context.clone())),
            context,
            callbacks,
            bulkhead,
        })
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Accepts either:
    /// - A plain closure: `circuit.call(|| api_request())`
    /// - A closure with options:
    ///   `circuit.call((|| api_request(), CallOptions::new().with_fallback(...)))`
    pub fn call<I, T, E>(&self, input: I) -> Result<T, CircuitError<E>>
    where
        I: IntoCallOptions<T, E>,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (operation, options) = input.into_call_options();
        self.execute(operation, options)
    }

    /// Like `call`, but the operation receives a token that is cancelled at
    /// the deadline so it can stop early
    pub fn call_cancellable<F, T, E>(
        &self,
        operation: F,
        options: CallOptions<T, E>,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce(&CancelToken) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.execute(Box::new(operation), options)
    }

    fn execute<T, E>(
        &self,
        operation: OperationFn<T, E>,
        options: CallOptions<T, E>,
    ) -> Result<T, CircuitError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let mut fired = None;
        let admitted = self.admit(&mut fired);
        self.announce(fired);

        let mut admission = match admitted {
            Ok(admission) => admission,
            Err(rejection) => {
                tracing::debug!(circuit = %self.context.name, ?rejection, "call short-circuited");
                let error = rejection.into_error(&self.context.name);
                return self.fall_back(options, FallbackReason::Rejected, error);
            }
        };

        // The bulkhead slot stays taken until the operation itself returns,
        // even when the caller has already given up at the deadline
        let operation: OperationFn<T, E> = match admission.bulkhead.take() {
            Some(permit) => Box::new(move |token: &CancelToken| {
                let _permit = permit;
                operation(token)
            }),
            None => operation,
        };

        let limit = self.context.config.deadline();
        let attempt = deadline::run(&self.context.name, operation, limit);
        let duration = self
            .context
            .clock
            .now()
            .saturating_sub(admission.started);

        let circuit = self.context.name.clone();
        let (outcome, reason, error) = match attempt {
            Attempt::Finished(Ok(value)) => {
                let fired = self.complete(admission, Outcome::Success, duration);
                self.announce(fired);
                return Ok(value);
            }
            Attempt::Finished(Err(e)) => {
                if !self.counts_as_failure(&e, duration) {
                    tracing::debug!(circuit = %self.context.name, "error not counted as failure");
                    return Err(CircuitError::Execution(e));
                }
                (
                    Outcome::Failure,
                    FallbackReason::OperationFailed,
                    CircuitError::Execution(e),
                )
            }
            Attempt::TimedOut => (
                Outcome::Timeout,
                FallbackReason::TimedOut,
                CircuitError::Timeout {
                    circuit,
                    after: limit.unwrap_or_default(),
                },
            ),
            Attempt::Panicked => (
                Outcome::Failure,
                FallbackReason::Panicked,
                CircuitError::Panicked { circuit },
            ),
            Attempt::NoWorker(source) => (
                Outcome::Failure,
                FallbackReason::OperationFailed,
                CircuitError::WorkerUnavailable { circuit, source },
            ),
        };

        let fired = self.complete(admission, outcome, duration);
        self.announce(fired);
        self.fall_back(options, reason, error)
    }

    /// Decide whether a call may run; the only place Open -> HalfOpen happens
    fn admit(&self, fired: &mut Option<Transition>) -> Result<Admission, Rejection> {
        let mut state = self.state.lock();
        let now = self.context.clock.now();

        let bulkhead = match &self.bulkhead {
            Some(pool) => match pool.try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    self.record_rejection(now);
                    return Err(Rejection::Bulkhead {
                        limit: pool.limit(),
                    });
                }
            },
            None => None,
        };

        if state.phase() == Phase::Open
            && state.machine.handle(CircuitEvent::AttemptReset).is_ok()
        {
            *fired = Some(state.mark_half_open(&self.context.config, now));
        }

        let probe = match state.phase() {
            Phase::Closed => None,
            Phase::Open => {
                self.record_rejection(now);
                let opened_at = state.open_data().map(|d| d.opened_at).unwrap_or_default();
                return Err(Rejection::Open { opened_at });
            }
            Phase::HalfOpen => {
                let permit = state
                    .half_open_data()
                    .map(|d| (d.probes.try_acquire(), d.probes.limit()));
                match permit {
                    Some((Some(permit), _)) => Some(permit),
                    Some((None, limit)) => {
                        self.record_rejection(now);
                        return Err(Rejection::ProbeLimit { limit });
                    }
                    None => {
                        self.record_rejection(now);
                        return Err(Rejection::ProbeLimit {
                            limit: self.context.config.max_half_open_probes,
                        });
                    }
                }
            }
        };

        Ok(Admission {
            started: now,
            probe,
            bulkhead,
        })
    }

    fn record_rejection(&self, now: Duration) {
        self.context.window.record(Sample {
            timestamp: now,
            outcome: Outcome::ShortCircuited,
            duration: Duration::ZERO,
        });
    }

    /// Record a finished call and re-evaluate the phase
    fn complete(
        &self,
        admission: Admission,
        outcome: Outcome,
        duration: Duration,
    ) -> Option<Transition> {
        let mut state = self.state.lock();
        let now = self.context.clock.now();
        let sample = Sample {
            timestamp: now,
            outcome,
            duration,
        };
        let window = &self.context.window;
        let config = &self.context.config;

        if outcome == Outcome::Success {
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
        }

        let is_probe = state.is_current_probe(admission.probe.as_ref());
        match state.phase() {
            Phase::Closed => {
                window.record(sample);
                if state.machine.handle(CircuitEvent::Trip).is_ok() {
                    return Some(state.mark_open(
                        config,
                        now,
                        Phase::Closed,
                        TransitionCause::Tripped,
                    ));
                }
                None
            }
            Phase::HalfOpen if is_probe && outcome == Outcome::Success => {
                if let Some(data) = state.machine.half_open_data_mut() {
                    data.consecutive_successes += 1;
                }
                if state.machine.handle(CircuitEvent::Close).is_ok() {
                    // Clear before recording so the closing probe is counted
                    if config.reset_window_on_close {
                        window.clear();
                    }
                    window.record(sample);
                    return Some(state.note(
                        Phase::HalfOpen,
                        Phase::Closed,
                        now,
                        TransitionCause::ProbeSucceeded,
                    ));
                }
                window.record(sample);
                None
            }
            Phase::HalfOpen if is_probe => {
                window.record(sample);
                if state.machine.handle(CircuitEvent::Reopen).is_ok() {
                    return Some(state.mark_open(
                        config,
                        now,
                        Phase::HalfOpen,
                        TransitionCause::ProbeFailed,
                    ));
                }
                None
            }
            // Calls admitted under an earlier phase only contribute statistics
            _ => {
                window.record(sample);
                None
            }
        }
    }

    fn counts_as_failure<E: 'static>(&self, error: &E, duration: Duration) -> bool {
        let Some(classifier) = &self.context.failure_classifier else {
            return true;
        };
        let ctx = FailureContext {
            circuit_name: &self.context.name,
            error: error as &dyn Any,
            duration,
        };
        classifier.counts_as_failure(&ctx)
    }

    fn fall_back<T, E>(
        &self,
        options: CallOptions<T, E>,
        reason: FallbackReason,
        error: CircuitError<E>,
    ) -> Result<T, CircuitError<E>> {
        let Some(fallback) = options.fallback else {
            return Err(error);
        };

        let ctx = {
            let state = self.state.lock();
            FallbackContext {
                circuit_name: self.context.name.clone(),
                phase: state.phase(),
                reason,
                opened_at: state.open_data().map(|d| d.opened_at),
            }
        };
        fallback(&ctx).map_err(CircuitError::Fallback)
    }

    fn announce(&self, transition: Option<Transition>) {
        if let Some(transition) = transition {
            self.callbacks.dispatch(&self.context.name, &transition);
        }
    }

    /// Open the circuit now, regardless of statistics
    ///
    /// The normal sleep window then applies before probing resumes. Calling
    /// this on an open circuit restarts its sleep window.
    pub fn force_open(&self) {
        let mut state = self.state.lock();
        let now = self.context.clock.now();
        let from = state.phase();

        if from != Phase::Open && state.machine.handle(CircuitEvent::ForceOpen).is_err() {
            tracing::error!(
                circuit = %self.context.name,
                %from,
                "forced open rejected by state machine"
            );
            return;
        }
        let transition = state.mark_open(&self.context.config, now, from, TransitionCause::Forced);
        drop(state);
        self.announce(Some(transition));
    }

    /// Close the circuit now and clear its window
    pub fn force_close(&self) {
        let mut state = self.state.lock();
        let now = self.context.clock.now();
        let from = state.phase();

        if from != Phase::Closed && state.machine.handle(CircuitEvent::ForceClose).is_err() {
            tracing::error!(
                circuit = %self.context.name,
                %from,
                "forced close rejected by state machine"
            );
            return;
        }
        self.context.window.clear();
        state.consecutive_failures = 0;
        let transition = state.note(from, Phase::Closed, now, TransitionCause::Forced);
        drop(state);
        self.announce(Some(transition));
    }

    /// Snapshot of phase and window statistics; never changes state
    pub fn stats(&self) -> BreakerStats {
        let state = self.state.lock();
        let now = self.context.clock.now();
        let open = state.open_data();
        let half_open = state.half_open_data();

        BreakerStats {
            name: self.context.name.clone(),
            phase: state.phase(),
            window: self.context.window.snapshot(now),
            opened_at: open.map(|d| d.opened_at),
            sleep_window: open.map(|d| d.sleep_window),
            probe_eligible: open.is_some_and(|d| d.sleep_window_passed(now)),
            probes_in_flight: half_open.map_or(0, |d| d.probes.acquired()),
            probe_limit: self.context.config.max_half_open_probes,
            probe_successes: half_open.map_or(0, |d| d.consecutive_successes),
            consecutive_failures: state.consecutive_failures,
            transitions: state.transitions,
            last_transition: state.last_transition,
        }
    }

    /// Per-bucket counts of the active window, oldest first
    pub fn buckets(&self) -> Vec<BucketCounts> {
        let _state = self.state.lock();
        self.context.window.bucket_counts(self.context.clock.now())
    }

    /// Current phase (never triggers a transition)
    pub fn phase(&self) -> Phase {
        self.state.lock().phase()
    }

    pub fn is_open(&self) -> bool {
        self.phase() == Phase::Open
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.phase() == Phase::HalfOpen
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.phase().as_str()
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.context.config
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("phase", &self.phase())
            .field("callbacks", &self.callbacks)
            .field("bulkhead", &self.bulkhead)
            .finish()
    }
}
