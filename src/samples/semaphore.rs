//! A producer releases a semaphore 11 times, every 30 ticks; a
//! higher-priority consumer takes it with a 60-tick timeout. Once the
//! producer stops, the consumer times out, deletes the semaphore and exits.

use log::{info, warn};

use crate::clock::Timeout;
use crate::dispatch::ThreadContext;
use crate::error::{KernelError, KernelResult};
use crate::scheduler::Scheduler;
use crate::stack::Stack;
use crate::thread::{Priority, Step};

pub const THREAD_PRIORITY: Priority = 25;
pub const THREAD_TIMESLICE: u32 = 5;
pub const SEMAPHORE_NAME: &str = "dsem";

/// The producer stops after this many releases.
pub const RELEASES: usize = 11;
pub const RELEASE_PERIOD: u32 = 30;
pub const TAKE_TIMEOUT: u32 = 60;
pub const CONSUME_DELAY: u32 = 5;

const COUNT: usize = 0;

fn thread1_entry(ctx: &mut ThreadContext<'_>) -> Step {
    let count = ctx.regs()[COUNT];
    if count >= RELEASES {
        info!("t1 exit.");
        return Step::Exit;
    }
    ctx.regs_mut()[COUNT] = count + 1;
    info!("t1 release a dynamic semaphore.({})", count + 1);
    let released = ctx
        .semaphore_find(SEMAPHORE_NAME)
        .ok_or(KernelError::InvalidHandle)
        .and_then(|sem| ctx.semaphore_release(sem));
    if let Err(err) = released {
        warn!("t1 release failed: {}", err);
    }
    ctx.mark("released", (count + 1) as i64);
    Step::Sleep(RELEASE_PERIOD)
}

fn thread2_entry(ctx: &mut ThreadContext<'_>) -> Step {
    let Some(sem) = ctx.semaphore_find(SEMAPHORE_NAME) else {
        return Step::Exit;
    };
    if ctx.pc() == 0 {
        info!("t2 taking semaphore... ");
        return ctx.resume_at(1, Step::TakeSemaphore(sem, Timeout::Ticks(TAKE_TIMEOUT)));
    }

    match ctx.take_result() {
        Some(Ok(())) => {
            let number = ctx.regs()[COUNT] + 1;
            ctx.regs_mut()[COUNT] = number;
            info!("t2 success.({})", number);
            ctx.mark("taken", number as i64);
            ctx.resume_at(0, Step::Sleep(CONSUME_DELAY))
        }
        other => {
            info!("t2 over time.");
            ctx.mark("timed_out", i64::from(other == Some(Err(KernelError::Timeout))));
            match ctx.semaphore_delete(sem) {
                Ok(()) => info!("delete semaphore success.\nt2 exit."),
                Err(err) => warn!("delete semaphore failed: {}", err),
            }
            Step::Exit
        }
    }
}

/// Create the semaphore with `initial` units and both threads.
pub fn setup(s: &mut Scheduler, initial: u32, stacks: [Stack; 2]) -> KernelResult<()> {
    s.semaphore_create(SEMAPHORE_NAME, initial)?;
    info!("create done. dynamic semaphore value = {}.", initial);

    let [stack1, stack2] = stacks;
    let tid1 = s.thread_init(
        "thread1",
        thread1_entry,
        0,
        stack1,
        THREAD_PRIORITY,
        THREAD_TIMESLICE,
    )?;
    s.thread_start(tid1)?;
    let tid2 = s.thread_init(
        "thread2",
        thread2_entry,
        0,
        stack2,
        THREAD_PRIORITY - 1,
        THREAD_TIMESLICE,
    )?;
    s.thread_start(tid2)
}
