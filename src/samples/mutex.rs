//! Two threads increment a pair of shared counters with a sleep in
//! between. With the mutex the pair is always equal when `thread2` checks
//! it; with `protected = false` the sleeps interleave the updates and the
//! check reports the race.

use core::sync::atomic::{AtomicU8, Ordering};

use log::{info, warn};

use crate::clock::Timeout;
use crate::dispatch::ThreadContext;
use crate::error::KernelResult;
use crate::scheduler::Scheduler;
use crate::stack::Stack;
use crate::thread::{Priority, Step};

pub const THREAD_PRIORITY: Priority = 8;
pub const THREAD_TIMESLICE: u32 = 5;
pub const MUTEX_NAME: &str = "dmutex";

/// Both threads stop once `number1` reaches this.
pub const LIMIT: u8 = 50;

static NUMBER1: AtomicU8 = AtomicU8::new(0);
static NUMBER2: AtomicU8 = AtomicU8::new(0);

/// Current `(number1, number2)`.
pub fn counters() -> (u8, u8) {
    (NUMBER1.load(Ordering::Relaxed), NUMBER2.load(Ordering::Relaxed))
}

fn bump(counter: &AtomicU8) -> u8 {
    counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

/// Move to `resume`, taking the mutex first when protected.
fn take(ctx: &mut ThreadContext<'_>, resume: u32) -> Option<Step> {
    ctx.set_pc(resume);
    if ctx.arg() == 0 {
        return None;
    }
    let mutex = ctx.mutex_find(MUTEX_NAME)?;
    Some(Step::TakeMutex(mutex, Timeout::Forever))
}

fn release(ctx: &mut ThreadContext<'_>) {
    if ctx.arg() == 0 {
        return;
    }
    if let Some(mutex) = ctx.mutex_find(MUTEX_NAME) {
        if let Err(err) = ctx.mutex_release(mutex) {
            warn!("{} release failed: {}", ctx.name(), err);
        }
    }
}

fn thread1_entry(ctx: &mut ThreadContext<'_>) -> Step {
    loop {
        match ctx.pc() {
            0 => {
                if let Some(step) = take(ctx, 1) {
                    return step;
                }
            }
            1 => {
                ctx.take_result();
                let n1 = bump(&NUMBER1);
                info!("T1 adding n1 to {}", n1);
                info!("T1 blocked.");
                return ctx.resume_at(2, Step::Sleep(30));
            }
            _ => {
                let n2 = bump(&NUMBER2);
                info!("T1 adding n2 to {}", n2);
                release(ctx);
                if counters().0 >= LIMIT {
                    info!("T1 exit.");
                    return Step::Exit;
                }
                ctx.set_pc(0);
            }
        }
    }
}

fn thread2_entry(ctx: &mut ThreadContext<'_>) -> Step {
    loop {
        match ctx.pc() {
            0 => {
                if let Some(step) = take(ctx, 1) {
                    return step;
                }
            }
            1 => {
                ctx.take_result();
                let (n1, n2) = counters();
                if n1 == n2 {
                    info!("Protected. n1 = n2 = {}", n1);
                } else {
                    info!("Not protected. n1 = {}, n2 = {}", n1, n2);
                }
                ctx.mark("consistent", i64::from(n1 == n2));
                let n1 = bump(&NUMBER1);
                info!("T2 adding n1 to {}", n1);
                info!("T2 blocked.");
                return ctx.resume_at(2, Step::Sleep(10));
            }
            _ => {
                let n2 = bump(&NUMBER2);
                info!("T2 adding n2 to {}", n2);
                release(ctx);
                if counters().0 >= LIMIT {
                    info!("T2 exit.");
                    return Step::Exit;
                }
                ctx.set_pc(0);
            }
        }
    }
}

/// Create the mutex and both threads. Resets the shared counters.
pub fn setup(s: &mut Scheduler, protected: bool, stacks: [Stack; 2]) -> KernelResult<()> {
    s.mutex_create(MUTEX_NAME)?;
    NUMBER1.store(0, Ordering::Relaxed);
    NUMBER2.store(0, Ordering::Relaxed);

    let [stack1, stack2] = stacks;
    let flag = usize::from(protected);
    let tid1 = s.thread_init(
        "thread1",
        thread1_entry,
        flag,
        stack1,
        THREAD_PRIORITY,
        THREAD_TIMESLICE,
    )?;
    s.thread_start(tid1)?;
    let tid2 = s.thread_init(
        "thread2",
        thread2_entry,
        flag,
        stack2,
        THREAD_PRIORITY - 1,
        THREAD_TIMESLICE,
    )?;
    s.thread_start(tid2)
}
