//! Rate limiting on a wrapping millisecond counter.
//!
//! Every manager in the node is polled far more often than it wants to run.
//! [`TickBudget`] turns "called every loop iteration" into "runs at most once
//! per interval", using [`elapsed_ms`] so the gate keeps working when the
//! 32-bit millisecond clock wraps (about every 49.7 days of uptime).

/// Milliseconds elapsed between `last` and `now` on a counter that wraps
/// at `u32::MAX`.
///
/// When `now < last` the clock has wrapped: the distance is the time left
/// until the wrap, plus the wrap step itself, plus `now`.
pub const fn elapsed_ms(last: u32, now: u32) -> u32 {
    if now >= last {
        now - last
    } else {
        (u32::MAX - last) + now + 1
    }
}

/// Gate that lets a periodic task run at most once per `interval_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickBudget {
    interval_ms: u32,
    last_run_ms: u32,
}

impl TickBudget {
    /// Create a budget whose last effective run is at t = 0.
    pub const fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            last_run_ms: 0,
        }
    }

    /// Returns `true` (and records `now_ms` as the last run) when at least
    /// one interval has passed since the last effective run.
    pub fn is_due(&mut self, now_ms: u32) -> bool {
        if elapsed_ms(self.last_run_ms, now_ms) < self.interval_ms {
            return false;
        }
        self.last_run_ms = now_ms;
        true
    }

    pub const fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub const fn last_run_ms(&self) -> u32 {
        self.last_run_ms
    }
}

/// Count a budget down by one tick interval.
///
/// Returns the remaining budget; `0` means it ran out on this tick.
pub const fn count_down(remaining_ms: u32, step_ms: u32) -> u32 {
    remaining_ms.saturating_sub(step_ms)
}
