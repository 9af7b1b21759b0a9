//! Failure classification
//!
//! Decides whether an error returned by a protected operation counts against
//! the circuit. Errors the classifier rejects are returned to the caller as-is:
//! they are not recorded in the window and never trigger the fallback.

use std::any::Any;
use std::time::Duration;

/// What a classifier gets to look at
#[derive(Debug)]
pub struct FailureContext<'a> {
    pub circuit_name: &'a str,
    /// The error value (can be downcast to the caller's error type)
    pub error: &'a dyn Any,
    /// How long the failed call ran
    pub duration: Duration,
}

/// Decides which errors count as failures
///
/// # Examples
///
/// ```rust
/// use circuit_engine::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// enum ApiError {
///     BadRequest,
///     Unavailable,
/// }
///
/// #[derive(Debug)]
/// struct ServerErrorsOnly;
///
/// impl FailureClassifier for ServerErrorsOnly {
///     fn counts_as_failure(&self, ctx: &FailureContext<'_>) -> bool {
///         !matches!(ctx.error.downcast_ref::<ApiError>(), Some(ApiError::BadRequest))
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// `true` if the error should be recorded as a failure
    fn counts_as_failure(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Counts every error
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn counts_as_failure(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Classifier backed by a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn counts_as_failure(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}
