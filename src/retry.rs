//! Retry with exponential backoff.
//!
//! [`retry`] re-invokes a [`TaskFactory`] until it fulfils or the retry
//! budget is exhausted. The backoff waits use the scheduler's timers, so on
//! a virtual clock a full retry sequence completes without sleeping.
//!
//! ```text
//!  attempt 0 ──fail──> wait d ──> attempt 1 ──fail──> wait 2d ──> attempt 2 ...
//!      │                              │
//!      └─ok──> fulfil                 └─ok──> fulfil
//! ```
//!
//! After the last permitted attempt fails, the result rejects with that
//! attempt's error; earlier errors are discarded.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::promise::{Promise, Reason, Settlement, Value};
use crate::scheduler::{Scheduler, SchedulerRef};
use crate::task::TaskFactory;

// =============================================================================
// RetryPolicy
// =============================================================================

/// How many times to retry and how long to wait in between.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use promissory::retry::RetryPolicy;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100));
/// assert_eq!(policy.delay_for(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(400));
///
/// let capped = policy.with_max_delay(Duration::from_millis(250));
/// assert_eq!(capped.delay_for(2), Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Option<Duration>,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries after the first
    /// attempt. Zero means a single attempt.
    #[must_use]
    pub const fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay: None,
        }
    }

    /// Caps every backoff delay at `max_delay`.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Retries allowed after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound on any single delay, if set.
    #[must_use]
    pub const fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Delay after failed attempt `attempt` (0-based): `initial_delay * 2^attempt`,
    /// saturating, then capped by `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        let delay = self.initial_delay.saturating_mul(multiplier);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

// =============================================================================
// retry
// =============================================================================

/// Runs `factory` until it fulfils, retrying with exponential backoff.
///
/// The first attempt starts before this function returns. After failed
/// attempt `n`, if `n < policy.max_retries()`, the next attempt starts
/// [`RetryPolicy::delay_for`]`(n)` later; otherwise the result rejects with
/// the error of attempt `n`.
///
/// ```rust
/// use std::time::Duration;
/// use promissory::Scheduler;
/// use promissory::retry::{retry, RetryPolicy};
///
/// let scheduler = Scheduler::new();
/// let mut calls = 0;
/// let flaky = move |_: &Scheduler| {
///     calls += 1;
///     if calls < 3 { Err(format!("failure {calls}")) } else { Ok("data") }
/// };
/// let result = retry(&scheduler, flaky, RetryPolicy::new(3, Duration::from_millis(10)));
/// assert_eq!(scheduler.block_on(&result).unwrap().value(), Some("data"));
/// assert_eq!(scheduler.now(), Duration::from_millis(30));
/// ```
pub fn retry<F, T, E>(scheduler: &Scheduler, factory: F, policy: RetryPolicy) -> Promise<T, E>
where
    F: TaskFactory<Output = T, Error = E> + Send + 'static,
    T: Value + Clone,
    E: Reason + Clone,
{
    let driver = Arc::new(RetryDriver {
        factory: Mutex::new(factory),
        state: Mutex::new(RetryState::Attempting(0)),
        policy,
        result: Promise::pending(scheduler),
        scheduler: scheduler.downgrade(),
    });
    let result = driver.result.clone();
    driver.attempt(0);
    result
}

/// Where a retry sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryState {
    /// Attempt `n` is in flight.
    Attempting(u32),
    /// Attempt `n` failed; waiting for the backoff timer.
    Waiting(u32),
    /// The result has settled.
    Finished,
}

struct RetryDriver<F, T, E> {
    factory: Mutex<F>,
    state: Mutex<RetryState>,
    policy: RetryPolicy,
    result: Promise<T, E>,
    scheduler: SchedulerRef,
}

impl<F, T, E> RetryDriver<F, T, E>
where
    F: TaskFactory<Output = T, Error = E> + Send + 'static,
    T: Value + Clone,
    E: Reason + Clone,
{
    fn attempt(self: Arc<Self>, attempt: u32) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        *self.state.lock() = RetryState::Attempting(attempt);
        // One attempt in flight at a time; never contended.
        let task = self.factory.lock().start(&scheduler);
        let promise = task.into_promise(&scheduler);
        promise.on_settle(move |outcome| match outcome {
            Settlement::Fulfilled(value) => {
                *self.state.lock() = RetryState::Finished;
                self.result.settle_fulfilled(value.clone());
            }
            Settlement::Rejected(error) => self.failed(attempt, error.clone()),
        });
    }

    fn failed(self: Arc<Self>, attempt: u32, error: E) {
        if attempt >= self.policy.max_retries {
            debug!(attempts = attempt + 1, ?error, "retries exhausted");
            *self.state.lock() = RetryState::Finished;
            self.result.settle_rejected(error);
            return;
        }
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        let delay = self.policy.delay_for(attempt);
        debug!(attempt, ?delay, ?error, "attempt failed; retrying after backoff");
        *self.state.lock() = RetryState::Waiting(attempt);
        scheduler.schedule(delay, move || self.attempt(attempt + 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let delays: Vec<_> = (0..4).map(|n| policy.delay_for(n)).collect();
        assert_eq!(
            delays,
            [10, 20, 40, 80].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.delay_for(64), Duration::MAX);
    }

    #[test]
    fn driver_tracks_state_transitions() {
        let scheduler = Scheduler::new();
        let driver = Arc::new(RetryDriver {
            factory: Mutex::new(|_: &Scheduler| Err::<i32, _>("nope")),
            state: Mutex::new(RetryState::Attempting(0)),
            policy: RetryPolicy::new(1, Duration::from_millis(5)),
            result: Promise::pending(&scheduler),
            scheduler: scheduler.downgrade(),
        });
        let result = driver.result.clone();
        Arc::clone(&driver).attempt(0);
        assert_eq!(*driver.state.lock(), RetryState::Attempting(0));

        assert_eq!(scheduler.block_on(&result).unwrap(), Settlement::Rejected("nope"));
        assert_eq!(*driver.state.lock(), RetryState::Finished);
        assert_eq!(scheduler.now(), Duration::from_millis(5));
    }
}
