//! Priority inversion, and how inheritance bounds it.
//!
//! `thread3` (lowest) takes the mutex and busy-runs for 500 ms. `thread2`
//! wakes at 50 ms and blocks on the mutex, which raises `thread3` to
//! `thread2`'s priority. `thread1` (highest) wakes at 100 ms and checks
//! that the two now run at the same priority. Without the mutex
//! (`take_mutex = false`) no boost happens and the check fails.

use log::{info, warn};

use crate::clock::{ticks_from_millis, Timeout};
use crate::config::TICK_HZ;
use crate::dispatch::ThreadContext;
use crate::error::KernelResult;
use crate::scheduler::Scheduler;
use crate::thread::{Priority, Step, ThreadEntry};

pub const THREAD_PRIORITY: Priority = 10;
pub const THREAD_STACK_SIZE: usize = 512;
pub const THREAD_TIMESLICE: u32 = 5;
pub const MUTEX_NAME: &str = "mutex";

/// Length of the busy loops, half a second.
pub const BUSY_TICKS: u64 = (TICK_HZ / 2) as u64;

// Saved words.
const START: usize = 0;
const OWNED: usize = 1;

fn thread1_entry(ctx: &mut ThreadContext<'_>) -> Step {
    if ctx.pc() == 0 {
        info!("T1 entry: blocked 100ms.");
        return ctx.resume_at(1, Step::Sleep(ticks_from_millis(100)));
    }

    info!("T1 testing:");
    let t2 = priority_of(ctx, "thread2");
    let t3 = priority_of(ctx, "thread3");
    info!(" - Priority of T2 is: {}", t2);
    info!(" - Priority of T3 is: {}", t3);
    ctx.mark("t2_priority", t2);
    ctx.mark("t3_priority", t3);
    if t2 == t3 {
        info!(" - Test OK.");
    } else {
        info!(" - Test failed.");
    }
    ctx.mark("inversion_bounded", i64::from(t2 == t3));
    Step::Exit
}

/// Effective priority of the named thread, `-1` if it is gone.
fn priority_of(ctx: &ThreadContext<'_>, name: &str) -> i64 {
    ctx.thread_find(name)
        .and_then(|id| ctx.thread_info(id).ok())
        .map_or(-1, |info| i64::from(info.effective_priority))
}

/// Busy-run from `START` for `BUSY_TICKS`, then release the mutex if it
/// was acquired and exit.
fn busy_then_release(ctx: &mut ThreadContext<'_>, label: &str) -> Step {
    if ctx.now() - (ctx.regs()[START] as u64) < BUSY_TICKS {
        return Step::Busy;
    }
    if ctx.regs()[OWNED] != 0 {
        info!("{} release mutex and exit.", label);
        if let Some(mutex) = ctx.mutex_find(MUTEX_NAME) {
            if let Err(err) = ctx.mutex_release(mutex) {
                warn!("{} release failed: {}", label, err);
            }
        }
    }
    let own = ctx.id();
    if let Ok(info) = ctx.thread_info(own) {
        ctx.mark("final_priority", i64::from(info.effective_priority));
    }
    Step::Exit
}

/// Record whether the mutex take just completed and start the busy loop.
fn took_mutex(ctx: &mut ThreadContext<'_>, label: &str) {
    let owned = matches!(ctx.take_result(), Some(Ok(())));
    if owned {
        info!("{} take a mutex successed.", label);
    } else {
        info!("{} take a mutex, failed.", label);
    }
    let now = ctx.now() as usize;
    let regs = ctx.regs_mut();
    regs[OWNED] = usize::from(owned);
    regs[START] = now;
}

fn thread2_entry(ctx: &mut ThreadContext<'_>) -> Step {
    match ctx.pc() {
        0 => {
            info!("T2 entry: blocked 50ms.");
            ctx.resume_at(1, Step::Sleep(ticks_from_millis(50)))
        }
        1 => {
            info!("T2 try to take a mutex.");
            match ctx.mutex_find(MUTEX_NAME) {
                Some(mutex) => ctx.resume_at(2, Step::TakeMutex(mutex, Timeout::Forever)),
                None => Step::Exit,
            }
        }
        2 => {
            took_mutex(ctx, "T2");
            ctx.resume_at(3, Step::Busy)
        }
        _ => busy_then_release(ctx, "T2"),
    }
}

fn thread3_entry(ctx: &mut ThreadContext<'_>) -> Step {
    match ctx.pc() {
        0 => {
            info!("T3 entry: no blocked.");
            let mutex = ctx.mutex_find(MUTEX_NAME);
            match mutex.filter(|_| ctx.arg() != 0) {
                Some(mutex) => {
                    info!("T3 try to take a mutex.");
                    ctx.resume_at(1, Step::TakeMutex(mutex, Timeout::Forever))
                }
                None => {
                    let now = ctx.now() as usize;
                    ctx.regs_mut()[START] = now;
                    ctx.resume_at(2, Step::Busy)
                }
            }
        }
        1 => {
            took_mutex(ctx, "T3");
            ctx.resume_at(2, Step::Busy)
        }
        _ => busy_then_release(ctx, "T3"),
    }
}

pub fn setup(s: &mut Scheduler, take_mutex: bool) -> KernelResult<()> {
    s.mutex_create(MUTEX_NAME)?;
    let threads = [
        ("thread1", thread1_entry as ThreadEntry, 0, THREAD_PRIORITY - 1),
        ("thread2", thread2_entry, 0, THREAD_PRIORITY),
        ("thread3", thread3_entry, usize::from(take_mutex), THREAD_PRIORITY + 1),
    ];
    for (name, entry, arg, priority) in threads {
        let tid = s.thread_create(name, entry, arg, THREAD_STACK_SIZE, priority, THREAD_TIMESLICE)?;
        info!("{} created, with priority {}", name, priority);
        s.thread_start(tid)?;
    }
    Ok(())
}
