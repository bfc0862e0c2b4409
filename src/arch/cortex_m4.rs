//! # Cortex-M4 Port Layer
//!
//! Hardware-specific glue for the ARM Cortex-M4 (Thumb-2): SysTick drives
//! the kernel tick and the main loop dispatches thread steps between ticks.
//!
//! Threads are step functions rather than separate machine stacks, so no
//! PendSV context switch is needed: a switch takes effect the next time the
//! main loop dispatches. The firmware binary installs the SysTick exception
//! handler and has it call [`crate::kernel::tick`].
//!
//! ## Interrupt Priorities
//!
//! - SysTick: lowest priority (0xF0 with 4 implemented bits), so it never
//!   delays application interrupts. Kernel state is guarded by
//!   `critical-section` (interrupt masking on a single core).

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::error::KernelResult;
use crate::kernel;

/// SysTick priority: the lowest level on a 4-bit NVIC.
pub const SYSTICK_PRIORITY: u8 = 0xF0;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the processor clock.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(reload);
    syst.clear_current();
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Drop SysTick to the lowest exception priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // Safety: changing a system handler priority cannot break a priority
    // based critical section; the kernel masks interrupts globally.
    unsafe {
        scb.set_priority(SystemHandler::SysTick, SYSTICK_PRIORITY);
    }
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

/// Start the timer and the installed kernel, then dispatch forever.
///
/// Each pass dispatches until the Running thread is busy for the rest of
/// the tick (or nothing runs), then sleeps until the tick count moves.
pub fn run(mut syst: SYST, mut scb: SCB) -> KernelResult<core::convert::Infallible> {
    set_interrupt_priorities(&mut scb);
    kernel::start()?;
    configure_systick(&mut syst);

    loop {
        let seen = kernel::now()?;
        kernel::run_once()?;
        while kernel::now()? == seen {
            cortex_m::asm::wfi();
        }
    }
}
