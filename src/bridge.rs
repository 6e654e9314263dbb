//! Interop with tokio and `async`/`await`.
//!
//! Two directions are covered:
//!
//! - **Future to promise**: [`spawn_on`] runs a future on a tokio runtime and
//!   settles a promise from the tokio worker thread. Settling from another
//!   thread is an injection: it queues the observers on the scheduler and
//!   wakes a loop that is waiting for work. [`on_runtime`] turns a future
//!   constructor into a [`TaskFactory`](crate::TaskFactory), so it can be
//!   retried or run under a concurrency limit.
//! - **Promise to future**: every [`Promise`] implements [`IntoFuture`] and
//!   can be `.await`ed. The future resolves from the scheduler loop, so some
//!   thread must be driving the scheduler meanwhile.
//!
//! Scheduler time is not tokio time. Pair the bridge with
//! [`ClockKind::Monotonic`](crate::scheduler::ClockKind::Monotonic) and an
//! [`idle_wait`](crate::SchedulerConfig::idle_wait), so that the loop does
//! not go idle while tokio work is still running.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use tokio::runtime::Handle;
use tracing::trace;

use crate::promise::{Promise, Reason, Settlement, Value};
use crate::scheduler::Scheduler;

/// Spawns `future` on `handle` and returns a promise for its result.
///
/// `Ok` fulfils the promise, `Err` rejects it. If the future panics, the
/// promise never settles.
pub fn spawn_on<Fut, T, E>(scheduler: &Scheduler, handle: &Handle, future: Fut) -> Promise<T, E>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Value,
    E: Reason,
{
    let promise = Promise::pending(scheduler);
    let target = promise.clone();
    handle.spawn(async move {
        let outcome = future.await;
        trace!(fulfilled = outcome.is_ok(), "bridged future completed");
        target.settle(outcome.into());
    });
    promise
}

/// Adapts a future constructor into a task factory that spawns each new
/// future on `handle`.
pub fn on_runtime<M, Fut, T, E>(
    handle: Handle,
    mut make: M,
) -> impl FnMut(&Scheduler) -> Promise<T, E> + Send + 'static
where
    M: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Value,
    E: Reason,
{
    move |scheduler: &Scheduler| spawn_on(scheduler, &handle, make())
}

// =============================================================================
// PromiseFuture
// =============================================================================

/// Future returned by `Promise::into_future`; resolves to the promise's
/// [`Settlement`].
#[must_use = "futures do nothing unless polled"]
pub struct PromiseFuture<T, E> {
    promise: Promise<T, E>,
    waker: Arc<AtomicWaker>,
    subscribed: bool,
}

impl<T, E> Future for PromiseFuture<T, E>
where
    T: Value + Clone,
    E: Reason + Clone,
{
    type Output = Settlement<T, E>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        self.waker.register(context.waker());
        if let Some(outcome) = self.promise.outcome() {
            return Poll::Ready(outcome);
        }
        if !self.subscribed {
            self.subscribed = true;
            let waker = Arc::clone(&self.waker);
            self.promise.on_settle(move |_| waker.wake());
        }
        Poll::Pending
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Value + Clone,
    E: Reason + Clone,
{
    type Output = Settlement<T, E>;
    type IntoFuture = PromiseFuture<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        PromiseFuture {
            promise: self,
            waker: Arc::new(AtomicWaker::new()),
            subscribed: false,
        }
    }
}

static_assertions::assert_impl_all!(PromiseFuture<String, String>: Send, Unpin);
