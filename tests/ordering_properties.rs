//! Property-based tests for ordering and concurrency guarantees.
//!
//! Every scheduler here runs on the virtual clock, so arbitrary delays
//! complete instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;

use promissory::combinator::{delay, run_sequential, wait_all, wait_first};
use promissory::retry::{RetryPolicy, retry};
use promissory::{BoundedRunner, Promise, Scheduler, Settlement};

// =============================================================================
// Strategies
// =============================================================================

/// Delays in milliseconds for up to `max_tasks` tasks.
fn delays(max_tasks: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0_u64..200, 0..max_tasks)
}

fn delayed_index(
    index: usize,
    millis: u64,
) -> impl FnMut(&Scheduler) -> Promise<usize, String> + Send + 'static {
    move |scheduler: &Scheduler| delay(scheduler, Duration::from_millis(millis), index)
}

proptest! {
    // =========================================================================
    // Aggregation Order
    // =========================================================================

    #[test]
    fn prop_wait_all_results_follow_input_order(millis in delays(16)) {
        let scheduler = Scheduler::new();
        let tasks: Vec<_> = millis
            .iter()
            .enumerate()
            .map(|(index, &millis)| delayed_index(index, millis))
            .collect();

        let all = wait_all(&scheduler, tasks);
        let outcome = scheduler.block_on(&all).unwrap();

        prop_assert_eq!(outcome, Settlement::Fulfilled((0..millis.len()).collect()));
        let longest = millis.iter().copied().max().unwrap_or(0);
        prop_assert_eq!(scheduler.now(), Duration::from_millis(longest));
    }

    #[test]
    fn prop_run_sequential_takes_the_sum_of_all_delays(millis in delays(12)) {
        let scheduler = Scheduler::new();
        let tasks: Vec<_> = millis
            .iter()
            .enumerate()
            .map(|(index, &millis)| delayed_index(index, millis))
            .collect();

        let results = run_sequential(&scheduler, tasks);
        let outcome = scheduler.block_on(&results).unwrap();

        prop_assert_eq!(outcome, Settlement::Fulfilled((0..millis.len()).collect()));
        prop_assert_eq!(scheduler.now(), Duration::from_millis(millis.iter().sum()));
    }

    #[test]
    fn prop_wait_first_picks_the_earliest_deadline(
        millis in prop::collection::vec(0_u64..200, 1..16)
    ) {
        let scheduler = Scheduler::new();
        let tasks: Vec<_> = millis
            .iter()
            .enumerate()
            .map(|(index, &millis)| delayed_index(index, millis))
            .collect();

        let first = wait_first(&scheduler, tasks);
        let outcome = scheduler.block_on(&first).unwrap();

        let earliest = millis.iter().copied().min().unwrap_or(0);
        let winner = millis.iter().position(|&value| value == earliest).unwrap_or(0);
        prop_assert_eq!(outcome, Settlement::Fulfilled(winner));
        prop_assert_eq!(scheduler.now(), Duration::from_millis(earliest));
    }

    // =========================================================================
    // Bounded Runner
    // =========================================================================

    #[test]
    fn prop_bounded_runner_respects_its_limit(millis in delays(24), limit in 1_usize..6) {
        let scheduler = Scheduler::new();
        let in_flight = Arc::new(Mutex::new((0_usize, 0_usize)));
        let tasks: Vec<_> = millis
            .iter()
            .enumerate()
            .map(|(index, &millis)| {
                let in_flight = Arc::clone(&in_flight);
                move |scheduler: &Scheduler| {
                    {
                        let mut counts = in_flight.lock();
                        counts.0 += 1;
                        counts.1 = counts.1.max(counts.0);
                    }
                    let in_flight = Arc::clone(&in_flight);
                    delay::<_, String>(scheduler, Duration::from_millis(millis), index).map(
                        move |value| {
                            in_flight.lock().0 -= 1;
                            value
                        },
                    )
                }
            })
            .collect();

        let results = BoundedRunner::new(limit).unwrap().run(&scheduler, tasks);
        let outcome = scheduler.block_on(&results).unwrap();

        prop_assert_eq!(outcome, Settlement::Fulfilled((0..millis.len()).collect()));
        let (current, peak) = *in_flight.lock();
        prop_assert_eq!(current, 0);
        prop_assert!(peak <= limit);
        prop_assert_eq!(peak, limit.min(millis.len()));
    }

    // =========================================================================
    // Retry Schedule
    // =========================================================================

    #[test]
    fn prop_retry_attempts_follow_the_backoff_schedule(
        max_retries in 0_u32..6,
        initial in 1_u64..50,
    ) {
        let scheduler = Scheduler::new();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&attempts);
        let failing = move |scheduler: &Scheduler| {
            recorder.lock().push(scheduler.now());
            Err::<(), _>("unavailable")
        };
        let policy = RetryPolicy::new(max_retries, Duration::from_millis(initial));

        let result = retry(&scheduler, failing, policy);
        let outcome = scheduler.block_on(&result).unwrap();

        prop_assert_eq!(outcome, Settlement::Rejected("unavailable"));
        let mut expected = vec![Duration::ZERO];
        for attempt in 0..max_retries {
            let previous = expected[expected.len() - 1];
            expected.push(previous + policy.delay_for(attempt));
        }
        prop_assert_eq!(attempts.lock().clone(), expected);
    }
}
