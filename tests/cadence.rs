// tests/cadence.rs

use std::time::Duration;

use proptest::prelude::*;
use streamsheets::machine::{DrainQueue, MIN_CYCLETIME, next_cycle_delay};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn overrunning_regulated_cycle_realigns_to_the_100ms_grid() {
    // 250 ms rounds up to 300 ms; the rest of the slot is waited.
    assert_eq!(next_cycle_delay(ms(100), ms(250), true), ms(50));
}

#[test]
fn short_cycletimes_use_a_10ms_grid() {
    assert_eq!(next_cycle_delay(ms(50), ms(63), true), ms(7));
}

#[test]
fn overrunning_unregulated_cycle_reschedules_immediately() {
    assert_eq!(next_cycle_delay(ms(100), ms(250), false), MIN_CYCLETIME);
}

#[test]
fn cycle_within_budget_waits_for_the_remainder() {
    assert_eq!(next_cycle_delay(ms(50), ms(20), true), ms(30));
    assert_eq!(next_cycle_delay(ms(50), ms(20), false), ms(30));
}

#[test]
fn delay_never_drops_below_the_minimum() {
    assert_eq!(next_cycle_delay(ms(100), ms(100), true), MIN_CYCLETIME);
    assert_eq!(next_cycle_delay(ms(100), ms(300), true), MIN_CYCLETIME);
}

#[test]
fn overrun_ending_on_a_grid_line_waits_the_minimum() {
    assert_eq!(next_cycle_delay(ms(100), ms(200), true), MIN_CYCLETIME);
    assert_eq!(next_cycle_delay(ms(50), ms(70), true), MIN_CYCLETIME);
    // One microsecond past the line rolls over to the next slot.
    assert_eq!(
        next_cycle_delay(ms(50), ms(70) + Duration::from_micros(1), true),
        Duration::from_micros(9_999)
    );
}

#[test]
fn drain_queue_holds_each_sheet_once() {
    let mut drains = DrainQueue::new();
    assert!(drains.schedule("a"));
    assert!(!drains.schedule("a"));
    assert!(drains.schedule("b"));
    assert_eq!(drains.len(), 2);

    assert_eq!(drains.pop().as_deref(), Some("a"));
    assert!(!drains.contains("a"));
    assert!(drains.schedule("a"), "popped sheets can be scheduled again");
    assert_eq!(drains.pop().as_deref(), Some("b"));

    drains.clear();
    assert!(drains.is_empty());
}

proptest! {
    #[test]
    fn regulated_overrun_lands_on_the_grid(cycletime in 1u64..500, overrun in 1u64..2_000) {
        let cycletime = ms(cycletime);
        let elapsed = cycletime + ms(overrun);
        let delay = next_cycle_delay(cycletime, elapsed, true);

        let grid = if cycletime < ms(100) { ms(10) } else { ms(100) };
        prop_assert!(delay >= MIN_CYCLETIME);
        prop_assert!(delay <= grid);
        let landed = (elapsed + delay).as_micros();
        prop_assert!(
            landed % grid.as_micros() == 0 || delay == MIN_CYCLETIME,
            "elapsed {:?} + delay {:?} is off the grid", elapsed, delay
        );
    }
}
