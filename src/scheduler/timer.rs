//! Timer primitive and clocks.
//!
//! Timers live in a `BTreeMap` keyed by `(deadline, sequence)`, so timers
//! sharing a deadline fire in registration order and cancellation is a
//! single keyed removal.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::config::ClockKind;

pub(crate) type TimerCallback = Box<dyn FnOnce() + Send>;

/// Handle returned by [`Scheduler::schedule`](crate::Scheduler::schedule).
///
/// Pass it to [`Scheduler::cancel`](crate::Scheduler::cancel) to drop the
/// timer before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle {
    deadline: Duration,
    sequence: u64,
}

impl TimerHandle {
    /// Time on the scheduler clock at which the timer fires.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    const fn key(self) -> (Duration, u64) {
        (self.deadline, self.sequence)
    }
}

// =============================================================================
// TimerQueue
// =============================================================================

#[derive(Default)]
pub(crate) struct TimerQueue {
    entries: BTreeMap<(Duration, u64), TimerCallback>,
    next_sequence: u64,
}

impl TimerQueue {
    pub(crate) fn insert(&mut self, deadline: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle {
            deadline,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.entries.insert(handle.key(), callback);
        handle
    }

    /// Removes a timer. The callback is returned so the caller can drop it
    /// after releasing the scheduler lock.
    pub(crate) fn remove(&mut self, handle: TimerHandle) -> Option<TimerCallback> {
        self.entries.remove(&handle.key())
    }

    pub(crate) fn next_deadline(&self) -> Option<Duration> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<(TimerHandle, TimerCallback)> {
        let (deadline, _) = self.entries.keys().next()?;
        if *deadline > now {
            return None;
        }
        self.entries
            .pop_first()
            .map(|((deadline, sequence), callback)| (TimerHandle { deadline, sequence }, callback))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Clock
// =============================================================================

/// How the loop waits for a timer deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// Virtual clock: jump straight to the deadline.
    Advance,
    /// Monotonic clock: sleep until this instant.
    At(Instant),
    /// Monotonic clock, deadline beyond what `Instant` can represent.
    Never,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Clock {
    Virtual { now: Duration },
    Monotonic { origin: Instant },
}

impl Clock {
    pub(crate) fn new(kind: ClockKind) -> Self {
        match kind {
            ClockKind::Virtual => Self::Virtual {
                now: Duration::ZERO,
            },
            ClockKind::Monotonic => Self::Monotonic {
                origin: Instant::now(),
            },
        }
    }

    pub(crate) fn now(&self) -> Duration {
        match self {
            Self::Virtual { now } => *now,
            Self::Monotonic { origin } => origin.elapsed(),
        }
    }

    /// Moves virtual time forward. Never moves backwards; a no-op on the
    /// monotonic clock.
    pub(crate) fn advance_to(&mut self, target: Duration) {
        if let Self::Virtual { now } = self {
            if target > *now {
                *now = target;
            }
        }
    }

    pub(crate) fn wake_for(&self, deadline: Duration) -> Wake {
        match self {
            Self::Virtual { .. } => Wake::Advance,
            Self::Monotonic { origin } => {
                origin.checked_add(deadline).map_or(Wake::Never, Wake::At)
            }
        }
    }
}
