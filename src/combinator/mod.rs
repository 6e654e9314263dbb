//! Combinators over collections of task factories.
//!
//! - [`wait_all`]: all must fulfil; results in input order; first rejection wins
//! - [`wait_all_settled`]: never rejects; one [`Settlement`](crate::Settlement) per input
//! - [`wait_first`]: whichever task settles first decides the outcome
//! - [`run_sequential`]: one task at a time, in input order
//! - [`first_ok`]: fallback chain that keeps every error
//! - [`delay`], [`delay_reject`]: timer-backed promises
//! - [`with_timeout`]: a task raced against a deadline
//!
//! Combinators that start everything up front ([`wait_all`],
//! [`wait_all_settled`], [`wait_first`]) invoke every factory before they
//! return, in input order. Outcomes that arrive after the aggregate has
//! settled are discarded; the operations that produce them are not
//! interrupted.

mod all;
mod first;
mod sequence;
mod time;

pub use all::{wait_all, wait_all_settled};
pub use first::{first_ok, wait_first};
pub use sequence::run_sequential;
pub use time::{delay, delay_reject, with_timeout};

use crate::promise::{Promise, Reason, Value};
use crate::scheduler::Scheduler;
use crate::task::TaskFactory;

/// Invokes every factory once, in order, and normalizes the results.
fn start_all<I, F, T, E>(scheduler: &Scheduler, tasks: I) -> Vec<Promise<T, E>>
where
    I: IntoIterator<Item = F>,
    F: TaskFactory<Output = T, Error = E>,
    T: Value,
    E: Reason,
{
    tasks
        .into_iter()
        .map(|mut factory| factory.start(scheduler).into_promise(scheduler))
        .collect()
}
