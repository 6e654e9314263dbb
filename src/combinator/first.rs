//! First-to-settle and fallback-chain combinators.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::start_all;
use crate::error::CompositeError;
use crate::promise::{Promise, Reason, Settlement, Value};
use crate::scheduler::{Scheduler, SchedulerRef};
use crate::task::TaskFactory;

/// Starts every task and settles with the outcome of whichever settles
/// first, fulfilled or rejected. Later outcomes are discarded.
///
/// An empty input is a caller error: the returned promise never settles and
/// a warning is logged. Driving it with
/// [`Scheduler::block_on`](crate::Scheduler::block_on) reports
/// [`RunError::Stalled`](crate::RunError::Stalled).
pub fn wait_first<I, F, T, E>(scheduler: &Scheduler, tasks: I) -> Promise<T, E>
where
    I: IntoIterator<Item = F>,
    F: TaskFactory<Output = T, Error = E>,
    T: Value + Clone,
    E: Reason + Clone,
{
    let promises = start_all(scheduler, tasks);
    if promises.is_empty() {
        warn!("wait_first called with no tasks; the result will never settle");
    }
    first_settled(scheduler, &promises)
}

/// Aggregates already-started promises with `wait_first` semantics.
fn first_settled<T, E>(scheduler: &Scheduler, promises: &[Promise<T, E>]) -> Promise<T, E>
where
    T: Value + Clone,
    E: Reason + Clone,
{
    let aggregate = Promise::pending(scheduler);
    for promise in promises {
        let aggregate = aggregate.clone();
        promise.on_settle(move |outcome| {
            if aggregate.is_pending() {
                aggregate.settle(outcome.clone());
            }
        });
    }
    aggregate
}

// =============================================================================
// first_ok
// =============================================================================

/// Tries the tasks one after another until one fulfils.
///
/// Each task is started only after the previous one rejected. If every task
/// rejects, the result rejects with a [`CompositeError`] holding all errors
/// in the order they occurred. An empty input rejects with an empty
/// composite.
///
/// ```rust
/// use promissory::Scheduler;
/// use promissory::combinator::first_ok;
///
/// let scheduler = Scheduler::new();
/// let sources = [Err("s1 down"), Err("s2 down"), Ok("s3 ok")]
///     .map(|outcome| move |_: &Scheduler| outcome);
/// let result = first_ok(&scheduler, sources);
/// assert_eq!(scheduler.block_on(&result).unwrap().value(), Some("s3 ok"));
/// ```
pub fn first_ok<I, F, T, E>(scheduler: &Scheduler, tasks: I) -> Promise<T, CompositeError<E>>
where
    I: IntoIterator<Item = F>,
    F: TaskFactory<Output = T, Error = E> + Send + 'static,
    T: Value + Clone,
    E: Reason + Clone,
{
    let chain = Arc::new(FallbackChain {
        state: Mutex::new(ChainState {
            remaining: tasks.into_iter().collect(),
            errors: Vec::new(),
        }),
        result: Promise::pending(scheduler),
        scheduler: scheduler.downgrade(),
    });
    let result = chain.result.clone();
    chain.try_next();
    result
}

struct ChainState<F, E> {
    remaining: VecDeque<F>,
    errors: Vec<E>,
}

struct FallbackChain<F, T, E> {
    state: Mutex<ChainState<F, E>>,
    result: Promise<T, CompositeError<E>>,
    scheduler: SchedulerRef,
}

impl<F, T, E> FallbackChain<F, T, E>
where
    F: TaskFactory<Output = T, Error = E> + Send + 'static,
    T: Value + Clone,
    E: Reason + Clone,
{
    fn try_next(self: Arc<Self>) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        let next = self.state.lock().remaining.pop_front();
        let Some(mut factory) = next else {
            let errors = mem::take(&mut self.state.lock().errors);
            debug!(failures = errors.len(), "every alternative failed");
            self.result.settle_rejected(CompositeError::new(errors));
            return;
        };

        let attempt = factory.start(&scheduler).into_promise(&scheduler);
        attempt.on_settle(move |outcome| match outcome {
            Settlement::Fulfilled(value) => {
                self.result.settle_fulfilled(value.clone());
            }
            Settlement::Rejected(error) => {
                debug!(?error, "alternative failed; trying the next one");
                self.state.lock().errors.push(error.clone());
                self.try_next();
            }
        });
    }
}
