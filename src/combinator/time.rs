//! Timer-backed promises and deadlines.

use std::time::Duration;

use tracing::debug;

use crate::error::TimeoutError;
use crate::promise::{Promise, Reason, Settlement, Value};
use crate::scheduler::Scheduler;
use crate::task::TaskFactory;

/// A promise that fulfils with `value` once `after` has elapsed on the
/// scheduler clock.
pub fn delay<T, E>(scheduler: &Scheduler, after: Duration, value: T) -> Promise<T, E>
where
    T: Value,
    E: Reason,
{
    let promise = Promise::pending(scheduler);
    let target = promise.clone();
    scheduler.schedule(after, move || {
        target.settle_fulfilled(value);
    });
    promise
}

/// A promise that rejects with `error` once `after` has elapsed on the
/// scheduler clock.
pub fn delay_reject<T, E>(scheduler: &Scheduler, after: Duration, error: E) -> Promise<T, E>
where
    T: Value,
    E: Reason,
{
    let promise = Promise::pending(scheduler);
    let target = promise.clone();
    scheduler.schedule(after, move || {
        target.settle_rejected(error);
    });
    promise
}

/// Starts `task` and races it against a deadline.
///
/// Settles with the task's outcome if it settles within `timeout`; its
/// rejections are wrapped in [`TimeoutError::Inner`]. Otherwise rejects with
/// [`TimeoutError::Elapsed`]. The task is not interrupted by the timeout, but
/// the deadline timer is cancelled as soon as the task settles.
///
/// ```rust
/// use std::time::Duration;
/// use promissory::{Scheduler, TimeoutError};
/// use promissory::combinator::{delay, with_timeout};
///
/// let scheduler = Scheduler::new();
/// let slow = |scheduler: &Scheduler| delay::<_, String>(scheduler, Duration::from_secs(5), "late");
/// let guarded = with_timeout(&scheduler, slow, Duration::from_secs(1));
/// let outcome = scheduler.block_on(&guarded).unwrap();
/// assert_eq!(outcome.error(), Some(TimeoutError::Elapsed(Duration::from_secs(1))));
/// ```
pub fn with_timeout<F, T, E>(
    scheduler: &Scheduler,
    mut task: F,
    timeout: Duration,
) -> Promise<T, TimeoutError<E>>
where
    F: TaskFactory<Output = T, Error = E>,
    T: Value + Clone,
    E: Reason + Clone,
{
    let result = Promise::pending(scheduler);
    let expired = result.clone();
    let deadline = scheduler.schedule(timeout, move || {
        if expired.is_pending() {
            debug!(?timeout, "deadline elapsed before the task settled");
            expired.settle_rejected(TimeoutError::Elapsed(timeout));
        }
    });

    let attempt = task.start(scheduler).into_promise(scheduler);
    let owner = scheduler.downgrade();
    let target = result.clone();
    attempt.on_settle(move |outcome| {
        if let Some(scheduler) = owner.upgrade() {
            scheduler.cancel(&deadline);
        }
        if target.is_pending() {
            target.settle(match outcome {
                Settlement::Fulfilled(value) => Settlement::Fulfilled(value.clone()),
                Settlement::Rejected(error) => Settlement::Rejected(TimeoutError::Inner(error.clone())),
            });
        }
    });
    result
}
