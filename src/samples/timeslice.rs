//! Two equal-priority counters with different timeslices. Output shows the
//! CPU alternating in proportion to the slices; each progress line is
//! printed inside the paired critical section so it is never split by a
//! rotation.

use log::{info, warn};

use crate::dispatch::ThreadContext;
use crate::error::KernelResult;
use crate::scheduler::Scheduler;
use crate::thread::{Priority, Step};

pub const THREAD_STACK_SIZE: usize = 1024;
pub const THREAD_PRIORITY: Priority = 20;
pub const THREAD_TIMESLICE: u32 = 30;

/// Count reached per tick of CPU time.
pub const COUNTS_PER_TICK: usize = 10;
pub const COUNT_LIMIT: usize = 6000;

const COUNT: usize = 0;

fn thread_entry(ctx: &mut ThreadContext<'_>) -> Step {
    let value = ctx.arg();
    let count = ctx.regs()[COUNT];

    ctx.enter_critical();
    info!("thread {} counting:{}", value, count);
    if let Err(err) = ctx.exit_critical() {
        warn!("thread {} exit_critical failed: {}", value, err);
    }

    if count >= COUNT_LIMIT {
        ctx.mark("end", value as i64);
        return Step::Exit;
    }
    ctx.regs_mut()[COUNT] = count + COUNTS_PER_TICK;
    Step::Busy
}

/// `slice1`/`slice2` of `0` fall back to the kernel default.
pub fn setup(s: &mut Scheduler, slice1: u32, slice2: u32) -> KernelResult<()> {
    for (value, slice, name) in [(1, slice1, "thread1"), (2, slice2, "thread2")] {
        let tid = s.thread_create(
            name,
            thread_entry,
            value,
            THREAD_STACK_SIZE,
            THREAD_PRIORITY,
            slice,
        )?;
        s.thread_start(tid)?;
    }
    Ok(())
}
