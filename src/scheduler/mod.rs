//! Single-threaded cooperative event loop.
//!
//! A [`Scheduler`] owns a FIFO microtask queue, a timer queue and a clock.
//! Promise callbacks are always delivered as microtasks, so they run one at
//! a time on whichever thread drives the loop through [`Scheduler::run`] or
//! [`Scheduler::block_on`], never inside the call that settled the promise.
//!
//! # Turn Model
//!
//! Each turn:
//!
//! 1. drains every queued microtask, in order (including ones queued while
//!    draining);
//! 2. fires at most one due timer;
//! 3. if nothing ran, moves to the next timer deadline: the virtual clock
//!    jumps there, the monotonic clock sleeps until it (waking early if work
//!    is injected from another thread).
//!
//! # Threads
//!
//! The scheduler handle is `Send + Sync`. Other threads may queue work on it
//! at any time, typically by settling a promise from a worker thread. Only
//! one thread may drive the loop at a time; a second driver, or a callback
//! that tries to drive the loop re-entrantly, gets [`RunError::AlreadyRunning`].
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use promissory::Scheduler;
//! use promissory::combinator::delay;
//!
//! let scheduler = Scheduler::new();
//! let promise = delay::<_, String>(&scheduler, Duration::from_millis(30), "done");
//! let outcome = scheduler.block_on(&promise).unwrap();
//! assert_eq!(outcome.into_result(), Ok("done"));
//! assert_eq!(scheduler.now(), Duration::from_millis(30));
//! ```

pub mod config;
pub mod timer;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

pub use config::{
    ClockKind, SchedulerConfig, SchedulerConfigBuilder, UnhandledRejectionPolicy,
};
pub use timer::TimerHandle;

use crate::error::RunError;
use crate::promise::{Promise, Reason, Settlement, Value};
use timer::{Clock, TimerCallback, TimerQueue, Wake};

pub(crate) type Microtask = Box<dyn FnOnce() + Send>;

// =============================================================================
// UnhandledRejection
// =============================================================================

/// A rejection that was dropped without ever being observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledRejection {
    /// `Debug` rendering of the rejection reason.
    pub reason: String,
    /// Scheduler time at which the report was made.
    pub reported_at: Duration,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Handle to a cooperative event loop.
///
/// Cloning is cheap; all clones drive the same loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<LoopState>,
    wakeup: Condvar,
}

struct LoopState {
    microtasks: VecDeque<Microtask>,
    timers: TimerQueue,
    clock: Clock,
    running: bool,
    unhandled: Vec<UnhandledRejection>,
    pending_panic: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Progressed,
    Idle,
}

static_assertions::assert_impl_all!(Scheduler: Send, Sync, Clone);

impl Scheduler {
    /// Creates a scheduler with the default configuration (virtual clock).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a scheduler with an explicit configuration.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        let state = LoopState {
            microtasks: VecDeque::new(),
            timers: TimerQueue::default(),
            clock: Clock::new(config.clock),
            running: false,
            unhandled: Vec::new(),
            pending_panic: None,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// The configuration this scheduler was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Current time on the scheduler clock, measured from its creation.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.state.lock().clock.now()
    }

    /// Queues a microtask.
    ///
    /// Microtasks run in the order they were queued, on the thread driving
    /// the loop. Safe to call from any thread.
    pub fn defer<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.state.lock().microtasks.push_back(Box::new(callback));
        self.inner.wakeup.notify_all();
    }

    /// Schedules `callback` to run once `after` has elapsed on the scheduler
    /// clock.
    pub fn schedule<F>(&self, after: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = {
            let mut state = self.inner.state.lock();
            let deadline = state.clock.now().saturating_add(after);
            state.timers.insert(deadline, Box::new(callback))
        };
        trace!(deadline = ?handle.deadline(), "timer scheduled");
        self.inner.wakeup.notify_all();
        handle
    }

    /// Cancels a timer that has not fired yet.
    ///
    /// Returns `false` if the timer already fired or was already cancelled.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        let removed: Option<TimerCallback> = self.inner.state.lock().timers.remove(*handle);
        // The callback may own the last reference to a promise; drop it
        // after the lock is released.
        let cancelled = removed.is_some();
        drop(removed);
        if cancelled {
            trace!(deadline = ?handle.deadline(), "timer cancelled");
            self.inner.wakeup.notify_all();
        }
        cancelled
    }

    /// Number of queued microtasks.
    #[must_use]
    pub fn pending_microtasks(&self) -> usize {
        self.inner.state.lock().microtasks.len()
    }

    /// Number of timers that have neither fired nor been cancelled.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.state.lock().timers.len()
    }

    /// Drains collected unhandled rejections.
    ///
    /// Only populated under [`UnhandledRejectionPolicy::Collect`].
    pub fn take_unhandled_rejections(&self) -> Vec<UnhandledRejection> {
        std::mem::take(&mut self.inner.state.lock().unhandled)
    }

    /// Runs the loop until no microtasks and no timers remain.
    ///
    /// With [`SchedulerConfig::idle_wait`] set, an idle loop first waits that
    /// long for work injected from other threads.
    ///
    /// # Errors
    ///
    /// [`RunError::AlreadyRunning`] if the loop is already being driven,
    /// [`RunError::MicrotaskBudgetExceeded`] if a microtask budget is
    /// configured and a turn exceeds it.
    ///
    /// # Panics
    ///
    /// Under [`UnhandledRejectionPolicy::Panic`], once an unhandled rejection
    /// has been reported: after the callback that dropped the promise, or on
    /// entry and exit when the drop happened outside the loop.
    pub fn run(&self) -> Result<(), RunError> {
        let _guard = RunGuard::acquire(&self.inner)?;
        self.raise_pending_panic();
        loop {
            if self.turn()? == Turn::Idle && !self.await_injection() {
                debug!(now = ?self.now(), "scheduler idle");
                self.raise_pending_panic();
                return Ok(());
            }
        }
    }

    /// Runs the loop until `promise` settles and returns its outcome.
    ///
    /// Returns [`RunError::Stalled`] if the loop runs out of work while the
    /// promise is still pending. The promise counts as observed, so a
    /// rejection returned here is never reported as unhandled.
    ///
    /// # Errors
    ///
    /// As for [`Scheduler::run`], plus [`RunError::Stalled`].
    ///
    /// # Panics
    ///
    /// As for [`Scheduler::run`].
    pub fn block_on<T, E>(&self, promise: &Promise<T, E>) -> Result<Settlement<T, E>, RunError>
    where
        T: Value + Clone,
        E: Reason + Clone,
    {
        let _guard = RunGuard::acquire(&self.inner)?;
        // Settlement from another thread must queue work to wake the loop.
        promise.on_settle(|_| {});
        self.raise_pending_panic();
        loop {
            if let Some(outcome) = promise.outcome() {
                self.raise_pending_panic();
                return Ok(outcome);
            }
            if self.turn()? == Turn::Idle && !self.await_injection() {
                warn!(now = ?self.now(), "scheduler stalled with the awaited promise still pending");
                self.raise_pending_panic();
                return Err(RunError::Stalled);
            }
        }
    }

    pub(crate) fn downgrade(&self) -> SchedulerRef {
        SchedulerRef(Arc::downgrade(&self.inner))
    }

    pub(crate) fn report_unhandled(&self, reason: String) {
        match self.inner.config.unhandled_rejections {
            UnhandledRejectionPolicy::Log => {
                warn!(%reason, "unhandled promise rejection");
            }
            UnhandledRejectionPolicy::Collect => {
                debug!(%reason, "collected unhandled promise rejection");
                let mut state = self.inner.state.lock();
                let reported_at = state.clock.now();
                state.unhandled.push(UnhandledRejection {
                    reason,
                    reported_at,
                });
            }
            UnhandledRejectionPolicy::Panic => {
                warn!(%reason, "unhandled promise rejection; the loop driver will panic");
                self.inner.state.lock().pending_panic.get_or_insert(reason);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Loop internals
    // -------------------------------------------------------------------------

    fn turn(&self) -> Result<Turn, RunError> {
        let drained = self.drain_microtasks()?;
        let fired = self.fire_due_timer();
        if drained > 0 || fired {
            return Ok(Turn::Progressed);
        }
        Ok(self.advance_to_next_deadline())
    }

    fn drain_microtasks(&self) -> Result<usize, RunError> {
        let budget = self.inner.config.max_microtasks_per_turn;
        let mut drained = 0;
        loop {
            let task = {
                let mut state = self.inner.state.lock();
                if state.microtasks.is_empty() {
                    break;
                }
                if let Some(budget) = budget.filter(|&budget| drained >= budget) {
                    return Err(RunError::MicrotaskBudgetExceeded { budget });
                }
                state.microtasks.pop_front()
            };
            if let Some(task) = task {
                task();
                drained += 1;
                self.raise_pending_panic();
            }
        }
        if drained > 0 {
            trace!(drained, "microtasks drained");
        }
        Ok(drained)
    }

    fn fire_due_timer(&self) -> bool {
        let due = {
            let mut state = self.inner.state.lock();
            let now = state.clock.now();
            state.timers.pop_due(now)
        };
        match due {
            Some((handle, callback)) => {
                trace!(deadline = ?handle.deadline(), "timer fired");
                callback();
                self.raise_pending_panic();
                true
            }
            None => false,
        }
    }

    fn advance_to_next_deadline(&self) -> Turn {
        let mut state = self.inner.state.lock();
        let Some(deadline) = state.timers.next_deadline() else {
            return Turn::Idle;
        };
        match state.clock.wake_for(deadline) {
            Wake::Advance => {
                state.clock.advance_to(deadline);
                trace!(now = ?deadline, "virtual clock advanced");
            }
            // Woken early by injected work or an earlier timer.
            Wake::At(wake_at) => {
                if state.microtasks.is_empty() {
                    let _ = self.inner.wakeup.wait_until(&mut state, wake_at);
                }
            }
            Wake::Never => {
                if state.microtasks.is_empty() {
                    self.inner.wakeup.wait(&mut state);
                }
            }
        }
        Turn::Progressed
    }

    /// Waits up to `idle_wait` for work queued from another thread.
    fn await_injection(&self) -> bool {
        let Some(wait) = self.inner.config.idle_wait else {
            return false;
        };
        let wait_until = Instant::now().checked_add(wait);
        let mut state = self.inner.state.lock();
        loop {
            if !state.microtasks.is_empty() || !state.timers.is_empty() {
                return true;
            }
            match wait_until {
                Some(wait_until) => {
                    if self
                        .inner
                        .wakeup
                        .wait_until(&mut state, wait_until)
                        .timed_out()
                    {
                        return !state.microtasks.is_empty() || !state.timers.is_empty();
                    }
                }
                None => self.inner.wakeup.wait(&mut state),
            }
        }
    }

    fn raise_pending_panic(&self) {
        let pending = self.inner.state.lock().pending_panic.take();
        if let Some(reason) = pending {
            panic!("unhandled promise rejection: {reason}");
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        formatter
            .debug_struct("Scheduler")
            .field("clock", &self.inner.config.clock)
            .field("now", &state.clock.now())
            .field("microtasks", &state.microtasks.len())
            .field("timers", &state.timers.len())
            .field("running", &state.running)
            .finish()
    }
}

// =============================================================================
// SchedulerRef
// =============================================================================

/// Weak handle held by promises and callbacks, so that pending work never
/// keeps a dropped scheduler alive.
#[derive(Clone)]
pub(crate) struct SchedulerRef(Weak<Inner>);

impl SchedulerRef {
    pub(crate) fn upgrade(&self) -> Option<Scheduler> {
        self.0.upgrade().map(|inner| Scheduler { inner })
    }
}

// =============================================================================
// RunGuard
// =============================================================================

/// Marks the loop as driven for the lifetime of a `run`/`block_on` call,
/// including when a callback unwinds.
struct RunGuard<'a> {
    inner: &'a Inner,
}

impl<'a> RunGuard<'a> {
    fn acquire(inner: &'a Inner) -> Result<Self, RunError> {
        let mut state = inner.state.lock();
        if state.running {
            return Err(RunError::AlreadyRunning);
        }
        state.running = true;
        Ok(Self { inner })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.inner.state.lock().running = false;
    }
}
