//! Error types for the scheduler, runners, and composite combinators.
//!
//! Task errors themselves are opaque to this crate: a promise carries
//! whatever error type its producer chose, and combinators pass it through
//! unchanged. The types here cover the few places where the crate itself has
//! something to report:
//!
//! - [`RunError`]: the event loop could not make progress
//! - [`LimitError`]: a bounded runner was configured with an invalid limit
//! - [`CompositeError`]: every alternative of a fallback chain failed
//! - [`TimeoutError`]: a task did not settle within its deadline
//! - [`ConfigError`]: a scheduler configuration could not be loaded

use std::fmt;
use std::time::Duration;

use thiserror::Error;

// =============================================================================
// RunError
// =============================================================================

/// Errors returned by [`Scheduler::run`](crate::Scheduler::run) and
/// [`Scheduler::block_on`](crate::Scheduler::block_on).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// The loop went idle (no microtasks, no timers, no injected work)
    /// while the awaited promise was still pending.
    #[error("scheduler stalled: no runnable work while the awaited promise is still pending")]
    Stalled,

    /// A single turn drained more microtasks than the configured budget.
    ///
    /// This almost always means a callback keeps re-queuing itself.
    #[error("microtask budget exceeded: more than {budget} microtasks in a single turn")]
    MicrotaskBudgetExceeded {
        /// The configured `max_microtasks_per_turn`.
        budget: usize,
    },

    /// The loop is already being driven, either re-entrantly from inside a
    /// callback or concurrently from another thread.
    #[error("scheduler is already running")]
    AlreadyRunning,
}

// =============================================================================
// LimitError
// =============================================================================

/// Errors raised when constructing a [`BoundedRunner`](crate::BoundedRunner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LimitError {
    /// The concurrency limit was zero.
    ///
    /// The limit must be at least 1.
    #[error("concurrency limit must be greater than 0")]
    ZeroLimit,
}

// =============================================================================
// CompositeError
// =============================================================================

/// All errors of a fallback chain, in the order the alternatives were tried.
///
/// Produced by [`first_ok`](crate::combinator::first_ok) when no alternative
/// succeeds. Unlike [`retry`](crate::retry::retry), which keeps only the
/// last error, a fallback chain keeps every one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeError<E> {
    errors: Vec<E>,
}

impl<E> CompositeError<E> {
    /// Creates a composite from the errors collected so far.
    #[must_use]
    pub const fn new(errors: Vec<E>) -> Self {
        Self { errors }
    }

    /// The collected errors, oldest first.
    #[must_use]
    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    /// Consumes the composite and returns the collected errors.
    #[must_use]
    pub fn into_errors(self) -> Vec<E> {
        self.errors
    }

    /// Number of collected errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` if no alternative was tried at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<E: fmt::Display> fmt::Display for CompositeError<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "all {} alternatives failed", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(formatter, "{separator}{error}")?;
        }
        Ok(())
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CompositeError<E> {}

// =============================================================================
// TimeoutError
// =============================================================================

/// Outcome of a task raced against a deadline that did not fulfil.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError<E> {
    /// The deadline fired first.
    #[error("timed out after {0:?}")]
    Elapsed(Duration),

    /// The task itself rejected before the deadline.
    #[error("{0}")]
    Inner(E),
}

impl<E> TimeoutError<E> {
    /// Returns `true` if the deadline fired first.
    #[must_use]
    pub const fn is_elapsed(&self) -> bool {
        matches!(self, Self::Elapsed(_))
    }

    /// Returns the task error, if the task rejected on its own.
    #[must_use]
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Elapsed(_) => None,
            Self::Inner(error) => Some(error),
        }
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Errors raised while loading a [`SchedulerConfig`](crate::SchedulerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed or did not match the schema.
    #[cfg(feature = "config-file")]
    #[error("invalid scheduler configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field was present but held an unusable value.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was refused.
        reason: String,
    },
}
