//! # promissory
//!
//! Promise-based task orchestration on a cooperative, single-threaded
//! scheduler.
//!
//! ## Overview
//!
//! - **Scheduler**: FIFO microtask queue, host timers, virtual or monotonic clock
//! - **Promise**: single-resolution value with observer callbacks
//! - **Combinators**: `wait_all`, `wait_all_settled`, `wait_first`, plus
//!   sequencing, fallback chains, delays and timeouts
//! - **Retry**: re-run a task factory with exponential backoff
//! - **Bounded runner**: run many tasks with a cap on how many are in flight
//!
//! Every callback runs on the thread driving the scheduler, one at a time,
//! so callbacks never race with each other. Promises may still be settled
//! from other threads.
//!
//! ## Feature Flags
//!
//! - `bridge` (default): tokio interop, `spawn_on` and `Promise: IntoFuture`
//! - `config-file` (default): load a `SchedulerConfig` from TOML
//! - `serde`: `Serialize`/`Deserialize` for settlements and policies
//! - `full`: Enable all features
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use promissory::prelude::*;
//!
//! let scheduler = Scheduler::new();
//! let tasks = [30_u64, 10, 20].map(|millis| {
//!     move |scheduler: &Scheduler| delay::<_, String>(scheduler, Duration::from_millis(millis), millis)
//! });
//! let all = wait_all(&scheduler, tasks);
//!
//! assert_eq!(scheduler.block_on(&all).unwrap(), Settlement::Fulfilled(vec![30, 10, 20]));
//! assert_eq!(scheduler.now(), Duration::from_millis(30));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types and functions.
///
/// # Usage
///
/// ```rust
/// use promissory::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bounded::{BoundedRunner, RejectionPolicy, run_with_limit};
    pub use crate::combinator::{
        delay, delay_reject, first_ok, run_sequential, wait_all, wait_all_settled, wait_first,
        with_timeout,
    };
    pub use crate::error::{CompositeError, LimitError, RunError, TimeoutError};
    pub use crate::promise::{Promise, PromiseStatus, Settlement};
    pub use crate::retry::{RetryPolicy, retry};
    pub use crate::scheduler::{ClockKind, Scheduler, SchedulerConfig};
    pub use crate::task::{Task, TaskFactory};

    #[cfg(feature = "bridge")]
    pub use crate::bridge::{on_runtime, spawn_on};
}

pub mod bounded;
pub mod combinator;
pub mod error;
pub mod promise;
pub mod retry;
pub mod scheduler;
pub mod task;

#[cfg(feature = "bridge")]
pub mod bridge;

pub use bounded::{BoundedRunner, RejectionPolicy};
pub use error::{CompositeError, ConfigError, LimitError, RunError, TimeoutError};
pub use promise::{Promise, PromiseStatus, Settlement};
pub use scheduler::{Scheduler, SchedulerConfig, UnhandledRejection};
pub use task::{IntoTask, Task, TaskFactory};
