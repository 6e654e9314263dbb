//! `run_sequential`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::promise::{Promise, Reason, Settlement, Value};
use crate::scheduler::{Scheduler, SchedulerRef};
use crate::task::TaskFactory;

/// Runs the tasks one at a time, in input order, starting each only after
/// the previous one fulfilled.
///
/// Fulfils with all values in input order. The first rejection rejects the
/// result and the remaining factories are never called.
///
/// ```rust
/// use std::time::Duration;
/// use promissory::Scheduler;
/// use promissory::combinator::{delay, run_sequential};
///
/// let scheduler = Scheduler::new();
/// let tasks = [30_u64, 10, 20].map(|millis| {
///     move |scheduler: &Scheduler| delay::<_, String>(scheduler, Duration::from_millis(millis), millis)
/// });
/// let results = run_sequential(&scheduler, tasks);
/// assert_eq!(scheduler.block_on(&results).unwrap().value(), Some(vec![30, 10, 20]));
/// assert_eq!(scheduler.now(), Duration::from_millis(60));
/// ```
pub fn run_sequential<I, F, T, E>(scheduler: &Scheduler, tasks: I) -> Promise<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: TaskFactory<Output = T, Error = E> + Send + 'static,
    T: Value + Clone,
    E: Reason + Clone,
{
    let remaining: VecDeque<F> = tasks.into_iter().collect();
    let sequence = Arc::new(Sequence {
        state: Mutex::new(SequenceState {
            values: Vec::with_capacity(remaining.len()),
            remaining,
        }),
        result: Promise::pending(scheduler),
        scheduler: scheduler.downgrade(),
    });
    let result = sequence.result.clone();
    sequence.advance();
    result
}

struct SequenceState<F, T> {
    remaining: VecDeque<F>,
    values: Vec<T>,
}

struct Sequence<F, T, E> {
    state: Mutex<SequenceState<F, T>>,
    result: Promise<Vec<T>, E>,
    scheduler: SchedulerRef,
}

impl<F, T, E> Sequence<F, T, E>
where
    F: TaskFactory<Output = T, Error = E> + Send + 'static,
    T: Value + Clone,
    E: Reason + Clone,
{
    fn advance(self: Arc<Self>) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        let next = {
            let mut state = self.state.lock();
            match state.remaining.pop_front() {
                Some(factory) => Ok(factory),
                None => Err(std::mem::take(&mut state.values)),
            }
        };
        let mut factory = match next {
            Ok(factory) => factory,
            Err(values) => {
                self.result.settle_fulfilled(values);
                return;
            }
        };

        let step = factory.start(&scheduler).into_promise(&scheduler);
        step.on_settle(move |outcome| match outcome {
            Settlement::Fulfilled(value) => {
                self.state.lock().values.push(value.clone());
                self.advance();
            }
            Settlement::Rejected(error) => {
                let skipped = self.state.lock().remaining.len();
                trace!(skipped, "sequence stopped on rejection");
                self.result.settle_rejected(error.clone());
            }
        });
    }
}
