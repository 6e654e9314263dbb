//! Bounded-concurrency task runner.
//!
//! A [`BoundedRunner`] runs a list of task factories with at most `limit`
//! operations in flight. It starts the first `min(limit, len)` tasks
//! immediately; each settlement frees a slot and starts the next task in
//! input order. Results are collected by input index, so the aggregate is
//! ordered the same way as the input no matter in which order tasks finish.
//!
//! # Capacity Model
//!
//! - `limit`: maximum number of tasks in flight, at least 1
//! - `in_flight <= limit` at every point of the run
//! - `limit >= len` behaves like [`wait_all`](crate::combinator::wait_all)
//!
//! # Rejections
//!
//! The first rejection rejects the aggregate with that error. What happens
//! to tasks not yet started depends on the [`RejectionPolicy`]:
//!
//! - [`RejectionPolicy::Halt`] (default): no further task is started; the
//!   ones already in flight finish and their outcomes are ignored
//! - [`RejectionPolicy::Continue`]: the remaining tasks are still started,
//!   under the same limit, and their outcomes are ignored
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use promissory::{BoundedRunner, Scheduler};
//! use promissory::combinator::delay;
//!
//! let scheduler = Scheduler::new();
//! let runner = BoundedRunner::new(2).unwrap();
//! let tasks = [30_u64, 10, 20].map(|millis| {
//!     move |scheduler: &Scheduler| delay::<_, String>(scheduler, Duration::from_millis(millis), millis)
//! });
//! let results = runner.run(&scheduler, tasks);
//! assert_eq!(scheduler.block_on(&results).unwrap().value(), Some(vec![30, 10, 20]));
//! // 10ms task finishes first, the 20ms task starts at 10ms and ends at 30ms.
//! assert_eq!(scheduler.now(), Duration::from_millis(30));
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::LimitError;
use crate::promise::{Promise, Reason, Settlement, Value};
use crate::scheduler::{Scheduler, SchedulerRef};
use crate::task::TaskFactory;

// =============================================================================
// RejectionPolicy
// =============================================================================

/// What a [`BoundedRunner`] does with queued tasks after a rejection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RejectionPolicy {
    /// Start nothing further.
    #[default]
    Halt,
    /// Keep starting queued tasks and ignore their outcomes.
    Continue,
}

// =============================================================================
// BoundedRunner
// =============================================================================

/// Runs task factories with a cap on how many are in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedRunner {
    limit: usize,
    policy: RejectionPolicy,
}

impl BoundedRunner {
    /// Creates a runner allowing `limit` tasks in flight.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::ZeroLimit`] if `limit` is 0.
    pub const fn new(limit: usize) -> Result<Self, LimitError> {
        if limit == 0 {
            return Err(LimitError::ZeroLimit);
        }
        Ok(Self {
            limit,
            policy: RejectionPolicy::Halt,
        })
    }

    /// Sets the behavior after a rejection.
    #[must_use]
    pub const fn with_policy(mut self, policy: RejectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The concurrency limit.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// The rejection policy.
    #[must_use]
    pub const fn policy(&self) -> RejectionPolicy {
        self.policy
    }

    /// Runs `tasks` and fulfils with their values in input order.
    ///
    /// The first `min(limit, len)` factories are called before this method
    /// returns. An empty input fulfils immediately with an empty vector.
    pub fn run<I, F, T, E>(&self, scheduler: &Scheduler, tasks: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator<Item = F>,
        F: TaskFactory<Output = T, Error = E> + Send + 'static,
        T: Value + Clone,
        E: Reason + Clone,
    {
        let factories: Vec<Option<F>> = tasks.into_iter().map(Some).collect();
        let result = Promise::pending(scheduler);
        if factories.is_empty() {
            result.settle_fulfilled(Vec::new());
            return result;
        }

        debug!(
            tasks = factories.len(),
            limit = self.limit,
            policy = ?self.policy,
            "bounded run started"
        );
        let runner = Arc::new(Runner {
            state: Mutex::new(RunnerState {
                results: std::iter::repeat_with(|| None).take(factories.len()).collect(),
                factories,
                next_index: 0,
                in_flight: 0,
                limit: self.limit,
                completed: 0,
                halted: false,
            }),
            policy: self.policy,
            result: result.clone(),
            scheduler: scheduler.downgrade(),
        });
        runner.pump(scheduler);
        result
    }
}

/// Runs `tasks` with at most `limit` in flight, halting on the first
/// rejection.
///
/// # Errors
///
/// Returns [`LimitError::ZeroLimit`] if `limit` is 0; no factory is called.
pub fn run_with_limit<I, F, T, E>(
    scheduler: &Scheduler,
    tasks: I,
    limit: usize,
) -> Result<Promise<Vec<T>, E>, LimitError>
where
    I: IntoIterator<Item = F>,
    F: TaskFactory<Output = T, Error = E> + Send + 'static,
    T: Value + Clone,
    E: Reason + Clone,
{
    Ok(BoundedRunner::new(limit)?.run(scheduler, tasks))
}

// =============================================================================
// Runner internals
// =============================================================================

struct RunnerState<F, T> {
    /// Indexed by input position; each slot written at most once.
    results: Vec<Option<T>>,
    /// Taken when the task at that position starts.
    factories: Vec<Option<F>>,
    next_index: usize,
    in_flight: usize,
    limit: usize,
    completed: usize,
    halted: bool,
}

impl<F, T> RunnerState<F, T> {
    /// Claims the next factory if a slot is free.
    fn claim(&mut self, policy: RejectionPolicy) -> Option<(usize, F)> {
        if self.halted && policy == RejectionPolicy::Halt {
            return None;
        }
        if self.in_flight >= self.limit || self.next_index >= self.factories.len() {
            return None;
        }
        let index = self.next_index;
        let factory = self.factories[index].take()?;
        self.next_index += 1;
        self.in_flight += 1;
        debug_assert!(self.in_flight <= self.limit, "in-flight count exceeds the limit");
        Some((index, factory))
    }

    /// Records a settlement and frees its slot. Returns every value, in
    /// input order, once the last task fulfilled without any rejection.
    fn release(&mut self, index: usize, value: Option<T>) -> Option<Vec<T>> {
        self.in_flight -= 1;
        self.completed += 1;
        match value {
            Some(value) if !self.halted => {
                debug_assert!(self.results[index].is_none(), "result {index} written twice");
                self.results[index] = Some(value);
            }
            Some(_) => {}
            None => self.halted = true,
        }
        if self.halted || self.completed < self.results.len() {
            return None;
        }
        Some(self.results.drain(..).flatten().collect())
    }
}

struct Runner<F, T, E> {
    state: Mutex<RunnerState<F, T>>,
    policy: RejectionPolicy,
    result: Promise<Vec<T>, E>,
    scheduler: SchedulerRef,
}

impl<F, T, E> Runner<F, T, E>
where
    F: TaskFactory<Output = T, Error = E> + Send + 'static,
    T: Value + Clone,
    E: Reason + Clone,
{
    /// Starts tasks until the limit is reached or none are left.
    fn pump(self: &Arc<Self>, scheduler: &Scheduler) {
        loop {
            let claimed = self.state.lock().claim(self.policy);
            let Some((index, mut factory)) = claimed else {
                return;
            };
            trace!(index, "starting task");
            let promise = factory.start(scheduler).into_promise(scheduler);
            drop(factory);

            let runner = Arc::clone(self);
            promise.on_settle(move |outcome| runner.settled(index, outcome));
        }
    }

    fn settled(self: Arc<Self>, index: usize, outcome: &Settlement<T, E>) {
        match outcome {
            Settlement::Fulfilled(value) => {
                let complete = self.state.lock().release(index, Some(value.clone()));
                if let Some(values) = complete {
                    debug!(tasks = values.len(), "bounded run fulfilled");
                    self.result.settle_fulfilled(values);
                    return;
                }
            }
            Settlement::Rejected(error) => {
                let first = {
                    let mut state = self.state.lock();
                    let first = !state.halted;
                    state.release(index, None);
                    first
                };
                if first {
                    debug!(index, ?error, policy = ?self.policy, "bounded run rejected");
                    self.result.settle_rejected(error.clone());
                }
            }
        }
        if let Some(scheduler) = self.scheduler.upgrade() {
            self.pump(&scheduler);
        }
    }
}
