//! # Clock and Timeouts
//!
//! The kernel's notion of time is a monotonic tick counter advanced once per
//! timer interrupt. Sleeping and timed-wait threads are kept, by the
//! scheduler, in a timer list ordered by their wake tick.

use crate::config::TICK_HZ;

/// Kernel time in ticks since start.
pub type Tick = u64;

/// Monotonic tick counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Clock {
    now: Tick,
}

impl Clock {
    pub const fn new() -> Self {
        Self { now: 0 }
    }

    /// Current tick.
    #[inline]
    pub const fn now(&self) -> Tick {
        self.now
    }

    /// Advance by one tick and return the new time.
    #[inline]
    pub fn advance(&mut self) -> Tick {
        self.now = self.now.wrapping_add(1);
        self.now
    }

    /// Absolute tick `ticks` from now.
    #[inline]
    pub const fn deadline(&self, ticks: u32) -> Tick {
        self.now.saturating_add(ticks as Tick)
    }
}

/// Convert milliseconds to ticks, rounding up so that a delay never
/// expires early.
pub const fn ticks_from_millis(ms: u32) -> u32 {
    let ticks = (ms as u64 * TICK_HZ as u64).div_ceil(1000);
    if ticks > u32::MAX as u64 {
        u32::MAX
    } else {
        ticks as u32
    }
}

/// Bound on a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail immediately with `Timeout` if the request cannot be satisfied.
    NoWait,
    /// Wait at most this many ticks.
    Ticks(u32),
    /// Wait until the resource becomes available or is deleted.
    Forever,
}

impl Timeout {
    /// `Ticks(0)` behaves like `NoWait`.
    pub const fn from_ticks(ticks: u32) -> Self {
        if ticks == 0 {
            Timeout::NoWait
        } else {
            Timeout::Ticks(ticks)
        }
    }

    #[inline]
    pub const fn is_no_wait(&self) -> bool {
        matches!(self, Timeout::NoWait | Timeout::Ticks(0))
    }

    /// Wake tick for a wait that starts at `clock`, if bounded.
    pub const fn deadline(&self, clock: &Clock) -> Option<Tick> {
        match self {
            Timeout::NoWait => Some(clock.now()),
            Timeout::Ticks(ticks) => Some(clock.deadline(*ticks)),
            Timeout::Forever => None,
        }
    }
}
