//! Integration tests for the combinators: `wait_all`, `wait_all_settled`,
//! `wait_first`, `run_sequential`, `first_ok` and `with_timeout`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rstest::{fixture, rstest};

use promissory::combinator::{
    delay, delay_reject, first_ok, run_sequential, wait_all, wait_all_settled, wait_first,
    with_timeout,
};
use promissory::promise::{Reason, Value};
use promissory::scheduler::{SchedulerConfig, UnhandledRejectionPolicy};
use promissory::task::{BoxTaskFactory, boxed};
use promissory::{
    BoundedRunner, CompositeError, Promise, RunError, Scheduler, Settlement, Task, TimeoutError,
};

type Outcome = Result<&'static str, &'static str>;

#[fixture]
fn scheduler() -> Scheduler {
    Scheduler::new()
}

/// A factory whose operation settles with `outcome` after `millis`.
fn task(
    millis: u64,
    outcome: Outcome,
) -> impl FnMut(&Scheduler) -> Promise<&'static str, &'static str> + Send + 'static {
    move |scheduler: &Scheduler| match outcome {
        Ok(value) => delay(scheduler, Duration::from_millis(millis), value),
        Err(error) => delay_reject(scheduler, Duration::from_millis(millis), error),
    }
}

/// Like [`task`], but records the scheduler time at which each call started.
fn recorded(
    starts: &Arc<Mutex<Vec<(&'static str, Duration)>>>,
    name: &'static str,
    millis: u64,
    outcome: Outcome,
) -> impl FnMut(&Scheduler) -> Promise<&'static str, &'static str> + Send + 'static {
    let starts = Arc::clone(starts);
    let mut inner = task(millis, outcome);
    move |scheduler: &Scheduler| {
        starts.lock().push((name, scheduler.now()));
        inner(scheduler)
    }
}

fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Number of already-settled tasks in the large-batch tests.
const BATCH: usize = 150_000;

fn immediate_batch()
-> impl Iterator<Item = impl FnMut(&Scheduler) -> Result<usize, String> + Send + 'static> {
    (0..BATCH).map(|index| move |_: &Scheduler| Ok::<_, String>(index))
}

fn collecting_scheduler() -> Scheduler {
    Scheduler::with_config(
        SchedulerConfig::builder()
            .unhandled_rejections(UnhandledRejectionPolicy::Collect)
            .build(),
    )
}

/// Drives `aggregate` and every losing task to completion, drops everything,
/// and checks that no rejection was reported as unhandled.
fn assert_no_unhandled_rejections<T, E>(scheduler: &Scheduler, aggregate: Promise<T, E>)
where
    T: Value + Clone,
    E: Reason + Clone,
{
    scheduler.block_on(&aggregate).unwrap();
    scheduler.run().unwrap();
    drop(aggregate);
    assert_eq!(scheduler.pending_timers(), 0);
    assert_eq!(scheduler.take_unhandled_rejections(), Vec::new());
}

// =============================================================================
// wait_all
// =============================================================================

#[rstest]
fn wait_all_preserves_input_order(scheduler: Scheduler) {
    let all = wait_all(
        &scheduler,
        [task(30, Ok("a")), task(10, Ok("b")), task(20, Ok("c"))],
    );

    let outcome = scheduler.block_on(&all).unwrap();

    assert_eq!(outcome, Settlement::Fulfilled(vec!["a", "b", "c"]));
    assert_eq!(scheduler.now(), millis(30));
}

#[rstest]
fn wait_all_rejects_without_waiting_for_slower_tasks(scheduler: Scheduler) {
    let all = wait_all(
        &scheduler,
        [task(10, Err("x")), task(100, Ok("y")), task(50, Err("z"))],
    );

    let outcome = scheduler.block_on(&all).unwrap();

    assert_eq!(outcome, Settlement::Rejected("x"));
    assert_eq!(scheduler.now(), millis(10));
    // The losers keep running; their outcomes are discarded.
    scheduler.run().unwrap();
    assert_eq!(all.outcome(), Some(Settlement::Rejected("x")));
    assert_eq!(scheduler.now(), millis(100));
}

#[rstest]
fn wait_all_of_nothing_fulfils_immediately(scheduler: Scheduler) {
    let all = wait_all(&scheduler, Vec::<fn(&Scheduler) -> Outcome>::new());
    assert_eq!(all.outcome(), Some(Settlement::Fulfilled(Vec::new())));
}

#[rstest]
fn wait_all_accepts_immediate_values(scheduler: Scheduler) {
    let tasks: Vec<BoxTaskFactory<&'static str, &'static str>> = vec![
        boxed(|_: &Scheduler| Task::<_, &'static str>::Immediate("now")),
        boxed(task(5, Ok("later"))),
        boxed(|_: &Scheduler| Ok::<_, &'static str>("also now")),
    ];

    let all = wait_all(&scheduler, tasks);

    assert_eq!(
        scheduler.block_on(&all).unwrap(),
        Settlement::Fulfilled(vec!["now", "later", "also now"])
    );
}

#[rstest]
fn wait_all_invokes_every_factory_before_returning(scheduler: Scheduler) {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let _all = wait_all(
        &scheduler,
        [
            recorded(&starts, "first", 30, Ok("a")),
            recorded(&starts, "second", 10, Ok("b")),
            recorded(&starts, "third", 20, Ok("c")),
        ],
    );

    assert_eq!(
        *starts.lock(),
        vec![
            ("first", Duration::ZERO),
            ("second", Duration::ZERO),
            ("third", Duration::ZERO)
        ]
    );
}

// =============================================================================
// wait_all_settled
// =============================================================================

#[rstest]
fn wait_all_settled_reports_every_outcome_in_order(scheduler: Scheduler) {
    let settled = wait_all_settled(
        &scheduler,
        [task(20, Ok("ok1")), task(10, Err("fail1")), task(30, Ok("ok2"))],
    );

    let outcome = scheduler.block_on(&settled).unwrap();

    assert_eq!(
        outcome,
        Settlement::Fulfilled(vec![
            Settlement::Fulfilled("ok1"),
            Settlement::Rejected("fail1"),
            Settlement::Fulfilled("ok2"),
        ])
    );
    assert_eq!(scheduler.now(), millis(30));
}

#[rstest]
fn wait_all_settled_of_nothing_fulfils_immediately(scheduler: Scheduler) {
    let settled = wait_all_settled(&scheduler, Vec::<fn(&Scheduler) -> Outcome>::new());
    let expected: Settlement<Vec<Settlement<&str, &str>>, Infallible> =
        Settlement::Fulfilled(Vec::new());
    assert_eq!(settled.outcome(), Some(expected));
}

// =============================================================================
// wait_first
// =============================================================================

#[rstest]
#[case::fastest_fulfils(vec![(30, Ok("slow")), (10, Ok("fast"))], Settlement::Fulfilled("fast"), 10)]
#[case::fastest_rejects(vec![(30, Ok("slow")), (5, Err("broken"))], Settlement::Rejected("broken"), 5)]
#[case::tie_goes_to_first_registered(vec![(10, Ok("a")), (10, Ok("b"))], Settlement::Fulfilled("a"), 10)]
fn wait_first_settles_with_the_earliest_outcome(
    scheduler: Scheduler,
    #[case] inputs: Vec<(u64, Outcome)>,
    #[case] expected: Settlement<&'static str, &'static str>,
    #[case] settled_at: u64,
) {
    let tasks: Vec<_> = inputs
        .into_iter()
        .map(|(after, outcome)| task(after, outcome))
        .collect();
    let first = wait_first(&scheduler, tasks);

    assert_eq!(scheduler.block_on(&first).unwrap(), expected);
    assert_eq!(scheduler.now(), millis(settled_at));
}

#[rstest]
fn wait_first_of_nothing_never_settles(scheduler: Scheduler) {
    let first = wait_first(&scheduler, Vec::<fn(&Scheduler) -> Outcome>::new());
    assert_eq!(scheduler.block_on(&first), Err(RunError::Stalled));
    assert!(first.is_pending());
}

// =============================================================================
// run_sequential
// =============================================================================

#[rstest]
fn run_sequential_starts_each_task_after_the_previous_one(scheduler: Scheduler) {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let results = run_sequential(
        &scheduler,
        [
            recorded(&starts, "a", 30, Ok("a")),
            recorded(&starts, "b", 10, Ok("b")),
            recorded(&starts, "c", 20, Ok("c")),
        ],
    );

    assert_eq!(
        scheduler.block_on(&results).unwrap(),
        Settlement::Fulfilled(vec!["a", "b", "c"])
    );
    assert_eq!(
        *starts.lock(),
        vec![("a", millis(0)), ("b", millis(30)), ("c", millis(40))]
    );
    assert_eq!(scheduler.now(), millis(60));
}

#[rstest]
fn run_sequential_stops_at_the_first_rejection(scheduler: Scheduler) {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let results = run_sequential(
        &scheduler,
        [
            recorded(&starts, "a", 10, Ok("a")),
            recorded(&starts, "b", 10, Err("b failed")),
            recorded(&starts, "c", 10, Ok("c")),
        ],
    );

    assert_eq!(
        scheduler.block_on(&results).unwrap(),
        Settlement::Rejected("b failed")
    );
    scheduler.run().unwrap();
    let names: Vec<_> = starts.lock().iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[rstest]
fn run_sequential_of_nothing_fulfils_immediately(scheduler: Scheduler) {
    let results = run_sequential(&scheduler, Vec::<fn(&Scheduler) -> Outcome>::new());
    assert_eq!(results.outcome(), Some(Settlement::Fulfilled(Vec::new())));
}

// =============================================================================
// first_ok
// =============================================================================

#[rstest]
fn first_ok_returns_the_first_success(scheduler: Scheduler) {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let result = first_ok(
        &scheduler,
        [
            recorded(&starts, "s1", 10, Err("s1 down")),
            recorded(&starts, "s2", 10, Ok("s2 ok")),
            recorded(&starts, "s3", 10, Ok("s3 ok")),
        ],
    );

    assert_eq!(scheduler.block_on(&result).unwrap(), Settlement::Fulfilled("s2 ok"));
    scheduler.run().unwrap();
    assert_eq!(starts.lock().len(), 2);
}

#[rstest]
fn first_ok_keeps_every_error_when_all_fail(scheduler: Scheduler) {
    let result = first_ok(
        &scheduler,
        [task(10, Err("s1 down")), task(5, Err("s2 down")), task(1, Err("s3 down"))],
    );

    let error = scheduler.block_on(&result).unwrap().error().unwrap();

    assert_eq!(error.errors(), &["s1 down", "s2 down", "s3 down"]);
    assert_eq!(error.to_string(), "all 3 alternatives failed: s1 down; s2 down; s3 down");
    assert_eq!(scheduler.now(), millis(16));
}

#[rstest]
fn first_ok_of_nothing_rejects_with_an_empty_composite(scheduler: Scheduler) {
    let result = first_ok(&scheduler, Vec::<fn(&Scheduler) -> Outcome>::new());
    assert_eq!(
        result.outcome(),
        Some(Settlement::Rejected(CompositeError::new(Vec::new())))
    );
}

// =============================================================================
// with_timeout
// =============================================================================

#[rstest]
fn with_timeout_passes_through_a_fast_value(scheduler: Scheduler) {
    let guarded = with_timeout(&scheduler, task(10, Ok("fast")), millis(100));

    assert_eq!(scheduler.block_on(&guarded).unwrap(), Settlement::Fulfilled("fast"));
    assert_eq!(scheduler.now(), millis(10));
    // The deadline timer was cancelled.
    assert_eq!(scheduler.pending_timers(), 0);
}

#[rstest]
fn with_timeout_wraps_a_fast_rejection(scheduler: Scheduler) {
    let guarded = with_timeout(&scheduler, task(10, Err("refused")), millis(100));

    assert_eq!(
        scheduler.block_on(&guarded).unwrap(),
        Settlement::Rejected(TimeoutError::Inner("refused"))
    );
}

#[rstest]
fn with_timeout_rejects_when_the_deadline_passes(scheduler: Scheduler) {
    let guarded = with_timeout(&scheduler, task(500, Ok("slow")), millis(100));

    let outcome = scheduler.block_on(&guarded).unwrap();

    assert_eq!(outcome, Settlement::Rejected(TimeoutError::Elapsed(millis(100))));
    assert_eq!(scheduler.now(), millis(100));
    // The slow task is not interrupted.
    scheduler.run().unwrap();
    assert_eq!(scheduler.now(), millis(500));
    assert_eq!(guarded.outcome(), Some(outcome));
}

// =============================================================================
// Losing Rejections
// =============================================================================

#[rstest]
fn wait_all_observes_rejections_after_short_circuit() {
    let scheduler = collecting_scheduler();
    let all = wait_all(
        &scheduler,
        [task(10, Err("x")), task(50, Err("z")), task(30, Ok("y"))],
    );

    assert_no_unhandled_rejections(&scheduler, all);
}

#[rstest]
fn wait_first_observes_losing_rejections() {
    let scheduler = collecting_scheduler();
    let first = wait_first(
        &scheduler,
        [task(10, Ok("fast")), task(30, Err("slow failure"))],
    );

    assert_no_unhandled_rejections(&scheduler, first);
}

#[rstest]
fn with_timeout_observes_a_rejection_after_the_deadline() {
    let scheduler = collecting_scheduler();
    let guarded = with_timeout(&scheduler, task(500, Err("late failure")), millis(100));

    assert_no_unhandled_rejections(&scheduler, guarded);
    assert_eq!(scheduler.now(), millis(500));
}

// =============================================================================
// Large Batches
// =============================================================================

#[rstest]
fn wait_all_fulfils_a_large_batch_of_immediate_values(scheduler: Scheduler) {
    let all = wait_all(&scheduler, immediate_batch());

    let values = scheduler.block_on(&all).unwrap().into_result().unwrap();

    assert_eq!(values.len(), BATCH);
    assert!(values.iter().enumerate().all(|(index, value)| index == *value));
}

#[rstest]
fn wait_all_settled_reports_a_large_batch_of_immediate_values(scheduler: Scheduler) {
    let settled = wait_all_settled(&scheduler, immediate_batch());

    let outcomes = scheduler.block_on(&settled).unwrap().into_result().unwrap();

    assert_eq!(outcomes.len(), BATCH);
    assert_eq!(outcomes[BATCH - 1], Settlement::Fulfilled(BATCH - 1));
}

#[rstest]
fn run_sequential_completes_a_large_batch_of_immediate_values(scheduler: Scheduler) {
    let sequence = run_sequential(&scheduler, immediate_batch());

    let values = scheduler.block_on(&sequence).unwrap().into_result().unwrap();

    assert_eq!(values.len(), BATCH);
    assert_eq!(values.last(), Some(&(BATCH - 1)));
}

#[rstest]
fn bounded_runner_completes_a_large_batch_of_immediate_values(scheduler: Scheduler) {
    let results = BoundedRunner::new(8).unwrap().run(&scheduler, immediate_batch());

    let values = scheduler.block_on(&results).unwrap().into_result().unwrap();

    assert_eq!(values.len(), BATCH);
    assert_eq!(values.first(), Some(&0));
}

#[rstest]
fn explicit_microtask_budget_still_applies_to_large_batches() {
    let scheduler = Scheduler::with_config(
        SchedulerConfig::builder().max_microtasks_per_turn(1_000).build(),
    );
    let all = wait_all(&scheduler, immediate_batch());

    assert_eq!(
        scheduler.block_on(&all),
        Err(RunError::MicrotaskBudgetExceeded { budget: 1_000 })
    );
}
