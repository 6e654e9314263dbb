//! `wait_all` and `wait_all_settled`.

use std::convert::Infallible;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::start_all;
use crate::promise::{Promise, Reason, Settlement, Value};
use crate::scheduler::Scheduler;
use crate::task::TaskFactory;

/// Positional result slots plus the number still outstanding.
struct Slots<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Slots<T> {
    fn new(len: usize) -> Self {
        Self {
            values: std::iter::repeat_with(|| None).take(len).collect(),
            remaining: len,
        }
    }

    /// Stores the value for `index`; returns every value, in order, once the
    /// last slot is filled.
    fn fill(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        debug_assert!(self.values[index].is_none(), "slot {index} written twice");
        self.values[index] = Some(value);
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }
        Some(self.values.drain(..).flatten().collect())
    }
}

/// Starts every task and fulfils with their values in input order.
///
/// Rejects with the first rejection observed, without waiting for the
/// remaining tasks; they keep running and their outcomes are discarded.
/// An empty input fulfils immediately with an empty vector.
///
/// ```rust
/// use std::time::Duration;
/// use promissory::{Scheduler, Settlement};
/// use promissory::combinator::{delay, delay_reject, wait_all};
///
/// let scheduler = Scheduler::new();
/// let tasks = [(10_u64, Err("x")), (100, Ok("y"))].map(|(millis, outcome)| {
///     move |scheduler: &Scheduler| match outcome {
///         Ok(value) => delay(scheduler, Duration::from_millis(millis), value),
///         Err(error) => delay_reject(scheduler, Duration::from_millis(millis), error),
///     }
/// });
/// let all = wait_all(&scheduler, tasks);
/// assert_eq!(scheduler.block_on(&all).unwrap(), Settlement::Rejected("x"));
/// assert_eq!(scheduler.now(), Duration::from_millis(10));
/// ```
pub fn wait_all<I, F, T, E>(scheduler: &Scheduler, tasks: I) -> Promise<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: TaskFactory<Output = T, Error = E>,
    T: Value + Clone,
    E: Reason + Clone,
{
    let promises = start_all(scheduler, tasks);
    all_fulfilled(scheduler, &promises)
}

/// Aggregates already-started promises with `wait_all` semantics.
fn all_fulfilled<T, E>(
    scheduler: &Scheduler,
    promises: &[Promise<T, E>],
) -> Promise<Vec<T>, E>
where
    T: Value + Clone,
    E: Reason + Clone,
{
    let aggregate = Promise::pending(scheduler);
    if promises.is_empty() {
        aggregate.settle_fulfilled(Vec::new());
        return aggregate;
    }

    let slots = Arc::new(Mutex::new(Slots::new(promises.len())));
    for (index, promise) in promises.iter().enumerate() {
        let slots = Arc::clone(&slots);
        let aggregate = aggregate.clone();
        promise.on_settle(move |outcome| match outcome {
            Settlement::Fulfilled(value) => {
                let complete = slots.lock().fill(index, value.clone());
                if let Some(values) = complete {
                    aggregate.settle_fulfilled(values);
                }
            }
            Settlement::Rejected(error) => {
                if aggregate.settle_rejected(error.clone()) {
                    trace!(index, "wait_all short-circuited on rejection");
                }
            }
        });
    }
    aggregate
}

/// Starts every task and fulfils, once all have settled, with one
/// [`Settlement`] per task in input order. Never rejects.
///
/// ```rust
/// use promissory::{Scheduler, Settlement};
/// use promissory::combinator::wait_all_settled;
///
/// let scheduler = Scheduler::new();
/// let tasks = [Ok("ok1"), Err("fail1")].map(|outcome| move |_: &Scheduler| outcome);
/// let settled = wait_all_settled(&scheduler, tasks);
/// let records = scheduler.block_on(&settled).unwrap().value().unwrap();
/// assert_eq!(records, vec![Settlement::Fulfilled("ok1"), Settlement::Rejected("fail1")]);
/// ```
pub fn wait_all_settled<I, F, T, E>(
    scheduler: &Scheduler,
    tasks: I,
) -> Promise<Vec<Settlement<T, E>>, Infallible>
where
    I: IntoIterator<Item = F>,
    F: TaskFactory<Output = T, Error = E>,
    T: Value + Clone,
    E: Reason + Clone,
{
    let promises = start_all(scheduler, tasks);
    let aggregate = Promise::pending(scheduler);
    if promises.is_empty() {
        aggregate.settle_fulfilled(Vec::new());
        return aggregate;
    }

    let slots = Arc::new(Mutex::new(Slots::new(promises.len())));
    for (index, promise) in promises.iter().enumerate() {
        let slots = Arc::clone(&slots);
        let aggregate = aggregate.clone();
        promise.on_settle(move |outcome| {
            let complete = slots.lock().fill(index, outcome.clone());
            if let Some(records) = complete {
                aggregate.settle_fulfilled(records);
            }
        });
    }
    aggregate
}
