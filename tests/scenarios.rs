//! End-to-end scheduling scenarios, driven through the public API with a
//! simulated clock.

use pios::samples;
use pios::{
    KernelConfig, KernelError, Scheduler, Stack, StackPool, Step, ThreadContext, ThreadId,
    ThreadState, Timeout, TraceEvent,
};

fn leaked(len: usize) -> &'static mut [u8] {
    vec![0u8; len].leak()
}

fn stack() -> Stack {
    Stack::from_static(leaked(1024)).unwrap()
}

fn scheduler_with_pool(config: KernelConfig) -> Scheduler {
    let pool = StackPool::new(leaked(8 * 1024 + 8), 1024).unwrap();
    Scheduler::new(config).with_stack_pool(pool)
}

fn all_done(s: &Scheduler) -> bool {
    s.threads().next().is_none()
}

fn marks(s: &Scheduler, tag: &str) -> Vec<(ThreadId, i64)> {
    s.trace().marks(tag).map(|(_, t, v)| (t, v)).collect()
}

#[test]
fn test_thread_sample_counts_to_completion() {
    // Only wakeups and marks are kept, so the ring holds the whole run.
    let config = KernelConfig {
        trace_switches: false,
        ..KernelConfig::default()
    };
    let mut s = scheduler_with_pool(config);
    samples::thread::setup(&mut s, stack()).unwrap();
    let t1 = s.thread_find("thread1").unwrap();
    let t2 = s.thread_find("thread2").unwrap();
    assert_eq!(s.stack_pool().map(|p| p.available()), Some(7));

    s.start();
    assert!(s.run_until(40_000, all_done));

    let counts = marks(&s, "count");
    assert_eq!(counts.iter().filter(|(t, _)| *t == t1).count(), 31);
    assert_eq!(counts.iter().filter(|(t, _)| *t == t2).count(), 31);
    // The pool block comes back once thread1 is reaped.
    assert_eq!(s.stack_pool().map(|p| p.available()), Some(8));
}

#[test]
fn test_priority_inheritance_bounds_inversion() {
    let mut s = scheduler_with_pool(KernelConfig::default());
    samples::priority_inversion::setup(&mut s, true).unwrap();
    let t2 = s.thread_find("thread2").unwrap();
    let t3 = s.thread_find("thread3").unwrap();

    s.start();
    assert!(s.run_until(5_000, all_done));

    assert_eq!(marks(&s, "t2_priority").last().map(|m| m.1), Some(10));
    assert_eq!(marks(&s, "t3_priority").last().map(|m| m.1), Some(10));
    assert_eq!(marks(&s, "inversion_bounded").last().map(|m| m.1), Some(1));

    let finals = marks(&s, "final_priority");
    assert!(finals.contains(&(t3, 11)));
    assert!(finals.contains(&(t2, 10)));

    // thread3 was raised once and restored once.
    let t3_changes: Vec<_> = s
        .trace()
        .iter()
        .filter_map(|event| match *event {
            TraceEvent::PriorityChanged { thread, from, to, .. } if thread == t3 => {
                Some((from, to))
            }
            _ => None,
        })
        .collect();
    assert_eq!(t3_changes, [(11, 10), (10, 11)]);
}

#[test]
fn test_priority_inversion_without_mutex() {
    let mut s = scheduler_with_pool(KernelConfig::default());
    samples::priority_inversion::setup(&mut s, false).unwrap();
    s.start();
    assert!(s.run_until(5_000, all_done));

    assert_eq!(marks(&s, "t2_priority").last().map(|m| m.1), Some(10));
    assert_eq!(marks(&s, "t3_priority").last().map(|m| m.1), Some(11));
    assert_eq!(marks(&s, "inversion_bounded").last().map(|m| m.1), Some(0));
}

#[test]
fn test_semaphore_sample_times_out_and_deletes() {
    let mut s = Scheduler::default();
    samples::semaphore::setup(&mut s, 0, [stack(), stack()]).unwrap();
    s.start();
    assert!(s.run_until(2_000, all_done));

    let taken: Vec<i64> = marks(&s, "taken").into_iter().map(|m| m.1).collect();
    assert_eq!(taken, (1..=11).collect::<Vec<_>>());
    assert_eq!(marks(&s, "released").len(), 11);
    let timed_out: Vec<i64> = marks(&s, "timed_out").into_iter().map(|m| m.1).collect();
    assert_eq!(timed_out, [1]);
    assert!(s.semaphore_find(samples::semaphore::SEMAPHORE_NAME).is_none());
    assert_eq!(s.stats().timeouts, 1);
}

#[test]
fn test_mutex_sample_protects_shared_counters() {
    // Both runs share the sample's static counters, so they stay in one test.
    let mut s = Scheduler::default();
    samples::mutex::setup(&mut s, true, [stack(), stack()]).unwrap();
    s.start();
    assert!(s.run_until(20_000, all_done));
    let consistent = marks(&s, "consistent");
    assert!(!consistent.is_empty());
    assert!(consistent.iter().all(|&(_, v)| v == 1));
    let (n1, n2) = samples::mutex::counters();
    assert_eq!(n1, n2);
    assert!(n1 >= samples::mutex::LIMIT);

    let mut s = Scheduler::default();
    samples::mutex::setup(&mut s, false, [stack(), stack()]).unwrap();
    s.start();
    assert!(s.run_until(20_000, all_done));
    assert!(marks(&s, "consistent").iter().any(|&(_, v)| v == 0));
}

#[test]
fn test_timeslice_sample_shares_cpu_by_quota() {
    let mut s = scheduler_with_pool(KernelConfig::default());
    samples::timeslice::setup(&mut s, 30, 15).unwrap();
    let t1 = s.thread_find("thread1").unwrap();
    s.start();
    assert!(s.run_until(5_000, all_done));

    // thread1 holds two thirds of the CPU, so it finishes first.
    let ends: Vec<i64> = marks(&s, "end").into_iter().map(|m| m.1).collect();
    assert_eq!(ends, [1, 2]);

    let first_run = s.trace().iter().find_map(|event| match *event {
        TraceEvent::Switch { tick, to, .. } if to != t1 => Some(tick),
        _ => None,
    });
    assert_eq!(first_run, Some(30));
}

fn critical_holder(ctx: &mut ThreadContext<'_>) -> Step {
    match ctx.pc() {
        0 => {
            ctx.enter_critical();
            let now = ctx.now() as usize;
            ctx.regs_mut()[0] = now;
            ctx.resume_at(1, Step::Busy)
        }
        1 => {
            if ctx.now() - (ctx.regs()[0] as u64) < 5 {
                return Step::Busy;
            }
            ctx.exit_critical().unwrap();
            ctx.mark("left", ctx.now() as i64);
            ctx.resume_at(2, Step::Busy)
        }
        _ => Step::Busy,
    }
}

fn first_run_marker(ctx: &mut ThreadContext<'_>) -> Step {
    if ctx.pc() == 0 {
        ctx.mark("ran", ctx.now() as i64);
        ctx.set_pc(1);
    }
    Step::Busy
}

#[test]
fn test_critical_section_defers_rotation_across_ticks() {
    let mut s = Scheduler::default();
    let a = s.thread_init("holder", critical_holder, 0, stack(), 12, 2).unwrap();
    let b = s.thread_init("peer", first_run_marker, 0, stack(), 12, 2).unwrap();
    s.thread_start(a).unwrap();
    s.thread_start(b).unwrap();
    s.start();

    s.run_ticks(4);
    assert_eq!(s.current_thread(), Some(a));
    assert_eq!(s.critical_nesting(), 1);

    s.run_ticks(4);
    let left = marks(&s, "left");
    let ran = marks(&s, "ran");
    assert_eq!(left, [(a, 5)]);
    assert_eq!(ran, [(b, 5)]);
    assert_eq!(s.critical_nesting(), 0);
}

fn exit_now(_: &mut ThreadContext<'_>) -> Step {
    Step::Exit
}

fn take_forever(ctx: &mut ThreadContext<'_>) -> Step {
    match (ctx.pc(), ctx.semaphore_find("gate")) {
        (0, Some(sem)) => ctx.resume_at(1, Step::TakeSemaphore(sem, Timeout::Forever)),
        _ => {
            let result = ctx.take_result();
            ctx.mark("deleted", i64::from(result == Some(Err(KernelError::ResourceDeleted))));
            Step::Exit
        }
    }
}

#[test]
fn test_stale_handles_are_rejected() {
    let mut s = Scheduler::default();
    let gate = s.semaphore_create("gate", 0).unwrap();
    let first = s.thread_init("short", exit_now, 0, stack(), 5, 0).unwrap();
    let waiter = s.thread_init("waiter", take_forever, 0, stack(), 6, 0).unwrap();
    s.thread_start(first).unwrap();
    s.thread_start(waiter).unwrap();
    s.start();
    s.run_ticks(2);

    assert_eq!(s.thread_info(first), Err(KernelError::InvalidHandle));
    assert_eq!(s.thread_info(waiter).map(|i| i.state), Ok(ThreadState::Blocked));

    s.semaphore_delete(gate).unwrap();
    assert_eq!(s.semaphore_release(gate), Err(KernelError::InvalidHandle));
    s.run_ticks(2);
    assert_eq!(marks(&s, "deleted"), [(waiter, 1)]);

    let reused = s.thread_init("again", exit_now, 0, stack(), 5, 0).unwrap();
    assert_ne!(reused, first);
    assert_eq!(s.thread_start(first), Err(KernelError::InvalidHandle));
}
