//! # Sample Programs
//!
//! Small multi-thread programs that exercise the kernel end to end. Each
//! module has a `setup` function that creates and starts its threads on a
//! scheduler; the caller then drives ticks (the host runner, the firmware
//! main loop, or a test).
//!
//! | Sample | Shows |
//! |--------|-------|
//! | [`thread`] | pool-allocated and caller-stack threads, sleep, preemption |
//! | [`timeslice`] | round robin between equal priorities, paired critical section |
//! | [`mutex`] | mutual exclusion across sleeps (and the race without it) |
//! | [`priority_inversion`] | priority inheritance |
//! | [`semaphore`] | hand-off, timed take, deletion |
//!
//! Observations are logged with `info!` and key values are recorded with
//! `ThreadContext::mark` so tests can assert on them.

pub mod mutex;
pub mod priority_inversion;
pub mod semaphore;
pub mod thread;
pub mod timeslice;

/// Parse an unsigned decimal argument. Any character other than a digit
/// makes the whole value `0`; overflow wraps.
pub fn str_to_dec(text: &str) -> u32 {
    let mut value: u32 = 0;
    for byte in text.bytes() {
        if !byte.is_ascii_digit() {
            return 0;
        }
        value = value.wrapping_mul(10).wrapping_add(u32::from(byte - b'0'));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_to_dec() {
        assert_eq!(str_to_dec("30"), 30);
        assert_eq!(str_to_dec("0"), 0);
        assert_eq!(str_to_dec(""), 0);
        assert_eq!(str_to_dec("12a"), 0);
        assert_eq!(str_to_dec("-1"), 0);
    }
}
