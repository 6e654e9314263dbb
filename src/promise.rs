//! Single-resolution promises.
//!
//! A [`Promise<T, E>`] is a cloneable handle to a cell that starts out
//! pending and settles exactly once, either fulfilled with a `T` or rejected
//! with an `E`. Any number of observers may register with
//! [`Promise::on_settle`]; each one is called exactly once with the same
//! [`Settlement`], whether it registered before or after settlement.
//!
//! # Delivery Guarantees
//!
//! - Observers never run inside `on_settle` or `settle_*`. They are queued
//!   as microtasks on the promise's [`Scheduler`] and run when the loop is
//!   driven.
//! - Observers of one promise run in registration order.
//! - Settling an already-settled promise is a no-op that returns `false`;
//!   the first outcome is final.
//!
//! # Unhandled Rejections
//!
//! A promise that is rejected and then dropped without any observer is
//! reported to its scheduler, which handles it according to its
//! [`UnhandledRejectionPolicy`](crate::scheduler::UnhandledRejectionPolicy).
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use promissory::{Promise, Scheduler, Settlement};
//!
//! let scheduler = Scheduler::new();
//! let promise: Promise<i32, String> = Promise::pending(&scheduler);
//!
//! let seen = Arc::new(Mutex::new(None));
//! let slot = Arc::clone(&seen);
//! promise.on_settle(move |outcome| *slot.lock() = Some(outcome.clone()));
//!
//! assert!(promise.settle_fulfilled(42));
//! assert!(!promise.settle_rejected("too late".to_owned()));
//! assert_eq!(*seen.lock(), None); // not delivered yet
//!
//! scheduler.run().unwrap();
//! assert_eq!(*seen.lock(), Some(Settlement::Fulfilled(42)));
//! ```

use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::scheduler::{Scheduler, SchedulerRef};

// =============================================================================
// Bounds
// =============================================================================

/// Bound for fulfilled values: shareable between the settling thread and the
/// thread driving the scheduler.
pub trait Value: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Value for T {}

/// Bound for rejection reasons. `Debug` is needed to report unhandled
/// rejections.
pub trait Reason: fmt::Debug + Send + Sync + 'static {}

impl<E: fmt::Debug + Send + Sync + 'static> Reason for E {}

// =============================================================================
// Settlement
// =============================================================================

/// Terminal outcome of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Settlement<T, E> {
    /// The operation produced a value.
    Fulfilled(T),
    /// The operation failed.
    Rejected(E),
}

impl<T, E> Settlement<T, E> {
    /// Returns `true` for [`Settlement::Fulfilled`].
    pub const fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    /// Returns `true` for [`Settlement::Rejected`].
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Borrows the contents.
    pub const fn as_ref(&self) -> Settlement<&T, &E> {
        match self {
            Self::Fulfilled(value) => Settlement::Fulfilled(value),
            Self::Rejected(error) => Settlement::Rejected(error),
        }
    }

    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Fulfilled(value) => Ok(value),
            Self::Rejected(error) => Err(error),
        }
    }

    /// The fulfilled value, if any.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Fulfilled(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    /// The rejection reason, if any.
    pub fn error(self) -> Option<E> {
        match self {
            Self::Fulfilled(_) => None,
            Self::Rejected(error) => Some(error),
        }
    }

    /// The matching [`PromiseStatus`].
    pub const fn status(&self) -> PromiseStatus {
        match self {
            Self::Fulfilled(_) => PromiseStatus::Fulfilled,
            Self::Rejected(_) => PromiseStatus::Rejected,
        }
    }
}

impl<T, E> From<Result<T, E>> for Settlement<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Fulfilled(value),
            Err(error) => Self::Rejected(error),
        }
    }
}

impl<T, E> From<Settlement<T, E>> for Result<T, E> {
    fn from(settlement: Settlement<T, E>) -> Self {
        settlement.into_result()
    }
}

// =============================================================================
// PromiseStatus
// =============================================================================

/// The three-state lifecycle of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseStatus {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Fulfilled,
    /// Settled with an error.
    Rejected,
}

impl fmt::Display for PromiseStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => formatter.write_str("pending"),
            Self::Fulfilled => formatter.write_str("fulfilled"),
            Self::Rejected => formatter.write_str("rejected"),
        }
    }
}

// =============================================================================
// Shared state
// =============================================================================

type Observer<T, E> = Box<dyn FnOnce(&Settlement<T, E>) + Send>;

enum Slot<T, E> {
    Pending(SmallVec<[Observer<T, E>; 2]>),
    Settled(Arc<Settlement<T, E>>),
}

struct Cell<T, E> {
    slot: Slot<T, E>,
    observed: bool,
    /// Set when rejected before anyone observed the promise; reported on drop.
    unhandled: Option<String>,
}

struct Shared<T, E> {
    scheduler: SchedulerRef,
    cell: Mutex<Cell<T, E>>,
}

impl<T, E> Drop for Shared<T, E> {
    fn drop(&mut self) {
        let Some(reason) = self.cell.get_mut().unhandled.take() else {
            return;
        };
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.report_unhandled(reason),
            None => warn!(%reason, "unhandled promise rejection after its scheduler was dropped"),
        }
    }
}

// =============================================================================
// Promise
// =============================================================================

/// Handle to a single-resolution asynchronous value.
///
/// Whoever creates a promise owns its settlement; consumers register
/// observers or read the outcome.
pub struct Promise<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Value, E: Reason> Promise<T, E> {
    /// Creates a pending promise bound to `scheduler`.
    #[must_use]
    pub fn pending(scheduler: &Scheduler) -> Self {
        Self::bound_to(scheduler.downgrade())
    }

    /// Creates a promise that is already fulfilled.
    #[must_use]
    pub fn fulfilled(scheduler: &Scheduler, value: T) -> Self {
        let promise = Self::pending(scheduler);
        promise.settle_fulfilled(value);
        promise
    }

    /// Creates a promise that is already rejected.
    #[must_use]
    pub fn rejected(scheduler: &Scheduler, error: E) -> Self {
        let promise = Self::pending(scheduler);
        promise.settle_rejected(error);
        promise
    }

    pub(crate) fn bound_to(scheduler: SchedulerRef) -> Self {
        Self {
            shared: Arc::new(Shared {
                scheduler,
                cell: Mutex::new(Cell {
                    slot: Slot::Pending(SmallVec::new()),
                    observed: false,
                    unhandled: None,
                }),
            }),
        }
    }

    /// Fulfils the promise. Returns `false` if it was already settled.
    pub fn settle_fulfilled(&self, value: T) -> bool {
        self.settle(Settlement::Fulfilled(value))
    }

    /// Rejects the promise. Returns `false` if it was already settled.
    pub fn settle_rejected(&self, error: E) -> bool {
        self.settle(Settlement::Rejected(error))
    }

    /// Settles the promise with `outcome`.
    ///
    /// Returns `false`, leaving the promise untouched, if it was already
    /// settled. Observers registered so far are queued on the scheduler in
    /// registration order.
    pub fn settle(&self, outcome: Settlement<T, E>) -> bool {
        let mut cell = self.shared.cell.lock();
        if let Slot::Settled(existing) = &cell.slot {
            let status = existing.status();
            drop(cell);
            debug!(%status, "ignoring settlement of an already-settled promise");
            return false;
        }
        if let Settlement::Rejected(error) = &outcome {
            if !cell.observed {
                cell.unhandled = Some(format!("{error:?}"));
            }
        }
        let outcome = Arc::new(outcome);
        let previous = mem::replace(&mut cell.slot, Slot::Settled(Arc::clone(&outcome)));
        drop(cell);

        if let Slot::Pending(observers) = previous {
            self.dispatch(observers, &outcome);
        }
        true
    }

    /// Registers an observer.
    ///
    /// The observer runs exactly once, as a microtask, with the terminal
    /// outcome. Registering on an already-settled promise still defers the
    /// call to the scheduler loop.
    pub fn on_settle<F>(&self, observer: F)
    where
        F: FnOnce(&Settlement<T, E>) + Send + 'static,
    {
        let mut cell = self.shared.cell.lock();
        cell.observed = true;
        cell.unhandled = None;
        let outcome = match &mut cell.slot {
            Slot::Pending(observers) => {
                observers.push(Box::new(observer));
                return;
            }
            Slot::Settled(outcome) => Arc::clone(outcome),
        };
        drop(cell);

        match self.shared.scheduler.upgrade() {
            Some(scheduler) => scheduler.defer(move || observer(&outcome)),
            None => debug!("scheduler dropped; observer discarded"),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> PromiseStatus {
        match &self.shared.cell.lock().slot {
            Slot::Pending(_) => PromiseStatus::Pending,
            Slot::Settled(outcome) => outcome.status(),
        }
    }

    /// Returns `true` while the promise is pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status() == PromiseStatus::Pending
    }

    /// Returns `true` once the promise is fulfilled or rejected.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// The scheduler this promise delivers its observers on, if it is still
    /// alive.
    #[must_use]
    pub fn scheduler(&self) -> Option<Scheduler> {
        self.shared.scheduler.upgrade()
    }

    /// Number of observers waiting for settlement.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        match &self.shared.cell.lock().slot {
            Slot::Pending(observers) => observers.len(),
            Slot::Settled(_) => 0,
        }
    }

    fn dispatch(&self, observers: SmallVec<[Observer<T, E>; 2]>, outcome: &Arc<Settlement<T, E>>) {
        if observers.is_empty() {
            return;
        }
        let Some(scheduler) = self.shared.scheduler.upgrade() else {
            debug!(count = observers.len(), "scheduler dropped; observers discarded");
            return;
        };
        for observer in observers {
            let outcome = Arc::clone(outcome);
            scheduler.defer(move || observer(&outcome));
        }
    }
}

impl<T: Value + Clone, E: Reason + Clone> Promise<T, E> {
    /// A copy of the terminal outcome, or `None` while pending.
    ///
    /// Reading a rejection counts as observing it.
    #[must_use]
    pub fn outcome(&self) -> Option<Settlement<T, E>> {
        let mut cell = self.shared.cell.lock();
        let outcome = match &cell.slot {
            Slot::Pending(_) => return None,
            Slot::Settled(outcome) => Settlement::clone(outcome),
        };
        cell.observed = true;
        cell.unhandled = None;
        Some(outcome)
    }

    /// Derives a promise whose value is `function` applied to this one's.
    /// Rejections pass through unchanged.
    #[must_use]
    pub fn map<U, F>(&self, function: F) -> Promise<U, E>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let derived = Promise::bound_to(self.shared.scheduler.clone());
        let target = derived.clone();
        self.on_settle(move |outcome| {
            let mapped = match outcome {
                Settlement::Fulfilled(value) => Settlement::Fulfilled(function(value.clone())),
                Settlement::Rejected(error) => Settlement::Rejected(error.clone()),
            };
            target.settle(mapped);
        });
        derived
    }

    /// Derives a promise whose rejection is `function` applied to this one's.
    /// Values pass through unchanged.
    #[must_use]
    pub fn map_err<G, F>(&self, function: F) -> Promise<T, G>
    where
        G: Reason,
        F: FnOnce(E) -> G + Send + 'static,
    {
        let derived = Promise::bound_to(self.shared.scheduler.clone());
        let target = derived.clone();
        self.on_settle(move |outcome| {
            let mapped = match outcome {
                Settlement::Fulfilled(value) => Settlement::Fulfilled(value.clone()),
                Settlement::Rejected(error) => Settlement::Rejected(function(error.clone())),
            };
            target.settle(mapped);
        });
        derived
    }

    /// Chains a dependent operation: once this promise fulfils, `function`
    /// starts the next one and the derived promise follows it.
    #[must_use]
    pub fn and_then<U, F>(&self, function: F) -> Promise<U, E>
    where
        U: Value + Clone,
        F: FnOnce(T) -> Promise<U, E> + Send + 'static,
    {
        let derived = Promise::bound_to(self.shared.scheduler.clone());
        let target = derived.clone();
        self.on_settle(move |outcome| match outcome {
            Settlement::Fulfilled(value) => {
                let next = function(value.clone());
                next.on_settle(move |outcome| {
                    target.settle(outcome.clone());
                });
            }
            Settlement::Rejected(error) => {
                target.settle_rejected(error.clone());
            }
        });
        derived
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.shared.cell.lock();
        let status = match &cell.slot {
            Slot::Pending(_) => PromiseStatus::Pending,
            Slot::Settled(outcome) => outcome.status(),
        };
        formatter
            .debug_struct("Promise")
            .field("status", &status)
            .field("observed", &cell.observed)
            .finish()
    }
}

static_assertions::assert_impl_all!(Promise<String, String>: Send, Sync, Clone);
