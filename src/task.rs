//! Tasks and task factories.
//!
//! A [`TaskFactory`] is a callable that starts one independent operation per
//! call. Calling it twice starts two operations; a promise that is already
//! running cannot be restarted, only re-created through its factory. This is
//! why [`retry`](crate::retry::retry) and the runners take factories rather
//! than promises.
//!
//! A factory may produce its outcome immediately or later, so it returns a
//! [`Task`], which the combinators normalize to a [`Promise`] at the boundary.
//!
//! Any `FnMut(&Scheduler) -> R` is a factory when `R` is a [`Promise`], a
//! [`Task`] or a `Result`:
//!
//! ```rust
//! use std::time::Duration;
//! use promissory::{Scheduler, Task};
//! use promissory::combinator::{delay, wait_all};
//!
//! let scheduler = Scheduler::new();
//! let results = wait_all(
//!     &scheduler,
//!     [10_u64, 30, 20].map(|millis| {
//!         move |scheduler: &Scheduler| {
//!             delay::<_, String>(scheduler, Duration::from_millis(millis), millis)
//!         }
//!     }),
//! );
//! let outcome = scheduler.block_on(&results).unwrap();
//! assert_eq!(outcome.into_result(), Ok(vec![10, 30, 20]));
//! ```

use crate::promise::{Promise, Reason, Value};
use crate::scheduler::Scheduler;

// =============================================================================
// Task
// =============================================================================

/// What a factory produced: a value that is already known, or a promise for
/// one.
pub enum Task<T, E> {
    /// The operation completed synchronously.
    Immediate(T),
    /// The operation failed synchronously.
    Failed(E),
    /// The operation is in flight.
    Deferred(Promise<T, E>),
}

impl<T: Value, E: Reason> Task<T, E> {
    /// Normalizes the task to a promise bound to `scheduler`.
    ///
    /// Immediate outcomes become already-settled promises, so observers
    /// still run on the scheduler loop.
    #[must_use]
    pub fn into_promise(self, scheduler: &Scheduler) -> Promise<T, E> {
        match self {
            Self::Immediate(value) => Promise::fulfilled(scheduler, value),
            Self::Failed(error) => Promise::rejected(scheduler, error),
            Self::Deferred(promise) => promise,
        }
    }

    /// Returns `true` unless the task is still in flight.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        !matches!(self, Self::Deferred(_))
    }
}

impl<T, E> From<Promise<T, E>> for Task<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Self::Deferred(promise)
    }
}

impl<T, E> From<Result<T, E>> for Task<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Immediate(value),
            Err(error) => Self::Failed(error),
        }
    }
}

// =============================================================================
// IntoTask
// =============================================================================

/// Conversion of a factory's return value into a [`Task`].
pub trait IntoTask {
    /// Fulfilled value type.
    type Output;
    /// Rejection reason type.
    type Error;

    /// Performs the conversion.
    fn into_task(self) -> Task<Self::Output, Self::Error>;
}

impl<T, E> IntoTask for Task<T, E> {
    type Output = T;
    type Error = E;

    fn into_task(self) -> Task<T, E> {
        self
    }
}

impl<T, E> IntoTask for Promise<T, E> {
    type Output = T;
    type Error = E;

    fn into_task(self) -> Task<T, E> {
        Task::Deferred(self)
    }
}

impl<T, E> IntoTask for Result<T, E> {
    type Output = T;
    type Error = E;

    fn into_task(self) -> Task<T, E> {
        self.into()
    }
}

// =============================================================================
// TaskFactory
// =============================================================================

/// Starts a new, independent operation each time it is called.
pub trait TaskFactory {
    /// Fulfilled value type.
    type Output;
    /// Rejection reason type.
    type Error;

    /// Starts the operation.
    fn start(&mut self, scheduler: &Scheduler) -> Task<Self::Output, Self::Error>;
}

impl<F, R> TaskFactory for F
where
    F: FnMut(&Scheduler) -> R,
    R: IntoTask,
{
    type Output = R::Output;
    type Error = R::Error;

    fn start(&mut self, scheduler: &Scheduler) -> Task<R::Output, R::Error> {
        self(scheduler).into_task()
    }
}

/// Type-erased factory, for collections mixing different closures.
pub type BoxTaskFactory<T, E> = Box<dyn FnMut(&Scheduler) -> Task<T, E> + Send>;

/// Boxes a factory into a [`BoxTaskFactory`].
pub fn boxed<F>(mut factory: F) -> BoxTaskFactory<F::Output, F::Error>
where
    F: TaskFactory + Send + 'static,
{
    Box::new(move |scheduler: &Scheduler| factory.start(scheduler))
}
