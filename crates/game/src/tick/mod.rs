mod estimator;
mod timestep;

use std::time::Duration;

pub use estimator::{ClockEstimator, MovingAverage, JITTER_COMPENSATION_TICKS, TICK_ERROR_WINDOW};
pub use timestep::FixedTimestep;

/// Wrapping 16-bit network tick.
pub type Tick = u16;

pub const DEFAULT_TICK_RATE: u32 = 60;

/// Amount of history kept for inputs and clock corrections.
pub const HISTORY_DURATION: Duration = Duration::from_secs(2);

#[inline]
pub fn to_network_tick(wall_tick: u64) -> Tick {
    (wall_tick & u64::from(u16::MAX)) as Tick
}

/// Signed distance from `b` to `a` on the 16-bit circle.
#[inline]
pub fn tick_delta(a: Tick, b: Tick) -> i16 {
    a.wrapping_sub(b) as i16
}

/// True iff `a` comes strictly after `b`. Only meaningful within half a period (32768 ticks).
#[inline]
pub fn is_more_recent(a: Tick, b: Tick) -> bool {
    tick_delta(a, b) > 0
}

/// Returns the most recent of two ticks.
#[inline]
pub fn most_recent(a: Tick, b: Tick) -> Tick {
    if is_more_recent(b, a) { b } else { a }
}

pub fn tick_duration(tick_rate: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(tick_rate.max(1)))
}

/// Number of ticks needed to cover [`HISTORY_DURATION`].
pub fn history_capacity(tick_duration: Duration) -> usize {
    let tick_secs = tick_duration.as_secs_f64().max(1e-9);
    // Sub-nanosecond rounding in `tick_duration` must not add a tick.
    let ticks = HISTORY_DURATION.as_secs_f64() / tick_secs - 1e-3;
    ticks.ceil().max(1.0) as usize
}
