//! # PiOS Configuration
//!
//! Compile-time limits for the kernel tables plus the small runtime
//! [`KernelConfig`]. All tables are fixed-size arrays sized here; there is
//! no dynamic allocation in the core.

/// Maximum number of threads (TCB slots), including terminated threads that
/// have not been reaped yet. Must not exceed 32: the inheritance walk keeps
/// its visited set in a `u32`.
pub const MAX_THREADS: usize = 16;

/// Number of priority levels. `0` is the highest priority,
/// `MAX_PRIORITIES - 1` the lowest. Bounded by the 32-bit ready bitmap.
pub const MAX_PRIORITIES: usize = 32;

/// Capacity of the mutex table.
pub const MAX_MUTEXES: usize = 8;

/// Capacity of the semaphore table.
pub const MAX_SEMAPHORES: usize = 8;

/// Largest value a semaphore count may reach.
pub const SEMAPHORE_MAX: u32 = 65_535;

/// Largest recursive hold count of a mutex.
pub const MUTEX_HOLD_MAX: u16 = u16::MAX;

/// SysTick frequency in Hz. One kernel tick per SysTick interrupt.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Default time slice in ticks, used when a thread is created with a
/// quota of `0`.
pub const DEFAULT_TIMESLICE: u32 = 10;

/// Smallest stack a thread may be given. Large enough for the hardware
/// exception frame (32 bytes) plus the software-saved context.
pub const MIN_STACK_SIZE: usize = 256;

/// Stack alignment required by the ARM AAPCS.
pub const STACK_ALIGN: usize = 8;

/// Number of saved words in a thread's context, mirroring R4–R11.
pub const CONTEXT_WORDS: usize = 8;

/// Capacity of the scheduler trace ring.
pub const TRACE_CAPACITY: usize = 256;

const _: () = assert!(MAX_THREADS <= 32);
const _: () = assert!(MAX_PRIORITIES <= 32);

/// Runtime knobs, fixed when the scheduler is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Quota substituted when a thread is created with a timeslice of `0`.
    pub default_timeslice: u32,
    /// Upper bound on thread steps dispatched within one tick. Guards
    /// against threads that loop on zero-time steps (e.g. yielding alone
    /// in their priority level).
    pub max_steps_per_tick: u32,
    /// Record context switches in the trace ring. Priority changes, wakeups
    /// and marks are always recorded.
    pub trace_switches: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            default_timeslice: DEFAULT_TIMESLICE,
            max_steps_per_tick: 64,
            trace_switches: true,
        }
    }
}

impl KernelConfig {
    /// Returns the effective quota for a requested timeslice.
    #[inline]
    pub const fn effective_timeslice(&self, requested: u32) -> u32 {
        if requested > 0 {
            requested
        } else if self.default_timeslice > 0 {
            self.default_timeslice
        } else {
            DEFAULT_TIMESLICE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_timeslice() {
        let config = KernelConfig::default();
        assert_eq!(config.effective_timeslice(0), DEFAULT_TIMESLICE);
        assert_eq!(config.effective_timeslice(3), 3);

        let zero = KernelConfig {
            default_timeslice: 0,
            ..KernelConfig::default()
        };
        assert_eq!(zero.effective_timeslice(0), DEFAULT_TIMESLICE);
    }
}
