// src/machine/cadence.rs

//! Delay between two machine cycles.

use std::time::Duration;

/// Lower bound of any cycle delay.
pub const MIN_CYCLETIME: Duration = Duration::from_millis(1);

/// Default cycle time.
pub const DEFAULT_CYCLETIME: Duration = Duration::from_millis(50);

/// Compute how long to wait before the next cycle.
///
/// A cycle that finished within `cycletime` waits for the rest of it (at
/// least [`MIN_CYCLETIME`]). An overrunning cycle is either rescheduled right
/// away (`regulated = false`, clamped to the minimum) or realigned onto a
/// grid: `elapsed` is rounded up to the next multiple of 10 ms for cycle times
/// under 100 ms, of 100 ms otherwise, and the remainder is waited. An
/// overrun that ends exactly on a grid line has no remainder and waits
/// [`MIN_CYCLETIME`].
pub fn next_cycle_delay(cycletime: Duration, elapsed: Duration, regulated: bool) -> Duration {
    if elapsed > cycletime && regulated {
        let grid: u128 = if cycletime < Duration::from_millis(100) {
            10_000
        } else {
            100_000
        };
        let elapsed_us = elapsed.as_micros();
        let rounded_us = elapsed_us.div_ceil(grid) * grid;
        let wait_us = (rounded_us - elapsed_us) as u64;
        return Duration::from_micros(wait_us).max(MIN_CYCLETIME);
    }

    cycletime.saturating_sub(elapsed).max(MIN_CYCLETIME)
}
