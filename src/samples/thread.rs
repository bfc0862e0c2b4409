//! Two counting threads. `thread1` gets its stack from the pool and counts
//! every 800 ms; `thread2` runs on a caller stack one level higher, counts
//! 31 times every 600 ms and preempts `thread1` whenever it wakes.

use log::info;

use crate::clock::ticks_from_millis;
use crate::dispatch::ThreadContext;
use crate::error::KernelResult;
use crate::scheduler::Scheduler;
use crate::stack::Stack;
use crate::thread::{Priority, Step};

pub const THREAD_PRIORITY: Priority = 25;
pub const THREAD_STACK_SIZE: usize = 512;
pub const THREAD_TIMESLICE: u32 = 5;

const COUNT: usize = 0;

fn thread1_entry(ctx: &mut ThreadContext<'_>) -> Step {
    if ctx.pc() == 0 {
        info!("thread1 begin");
        ctx.set_pc(1);
    }
    let count = ctx.regs()[COUNT];
    if count > 30 {
        info!("thread1 exit");
        return Step::Exit;
    }
    ctx.mark("count", count as i64);
    ctx.regs_mut()[COUNT] = count + 1;
    Step::Sleep(ticks_from_millis(800))
}

fn thread2_entry(ctx: &mut ThreadContext<'_>) -> Step {
    if ctx.pc() == 0 {
        info!("thread2 begin");
        ctx.set_pc(1);
    }
    let count = ctx.regs()[COUNT];
    if count >= 31 {
        info!("thread2 exit");
        return Step::Exit;
    }
    ctx.mark("count", count as i64);
    ctx.regs_mut()[COUNT] = count + 1;
    Step::Sleep(ticks_from_millis(600))
}

pub fn setup(s: &mut Scheduler, thread2_stack: Stack) -> KernelResult<()> {
    let tid1 = s.thread_create(
        "thread1",
        thread1_entry,
        0,
        THREAD_STACK_SIZE,
        THREAD_PRIORITY,
        THREAD_TIMESLICE,
    )?;
    s.thread_start(tid1)?;

    let tid2 = s.thread_init(
        "thread2",
        thread2_entry,
        0,
        thread2_stack,
        THREAD_PRIORITY - 1,
        THREAD_TIMESLICE,
    )?;
    s.thread_start(tid2)
}
