//! # Scheduler
//!
//! Core scheduling logic for PiOS: a preemptive, fixed-priority scheduler
//! with round robin among equal priorities.
//!
//! ## Scheduling Algorithm
//!
//! At each tick:
//! 1. **Advance the clock**
//! 2. **Account the timeslice**: charge the Running thread one tick; at
//!    zero its budget is refilled and it rotates to the back of its bucket
//! 3. **Expire timers**: sleepers and timed-out waiters become Ready, in
//!    wake order
//! 4. **Reap**: terminated threads that are no longer Running release
//!    their slot and stack
//! 5. **Select**: the head of the highest non-empty ready bucket runs
//!
//! `schedule()` also runs after every state-affecting operation. While a
//! critical section is held it only records that a reschedule is pending.
//!
//! ## Run queue discipline
//!
//! The Running thread is never linked into a ready bucket. When a strictly
//! more urgent thread becomes Ready the Running thread is pushed to the
//! *front* of its bucket and keeps its remaining budget; when its budget
//! runs out (or it yields) it goes to the *back* with a fresh budget.

use log::{debug, info, trace, warn};

use crate::clock::{Clock, Tick, Timeout};
use crate::config::{
    KernelConfig, MAX_MUTEXES, MAX_PRIORITIES, MAX_SEMAPHORES, MAX_THREADS, MIN_STACK_SIZE,
};
use crate::error::{KernelError, KernelResult};
use crate::handle::ThreadId;
use crate::list::{LinkKind, ThreadList};
use crate::mutex::MutexCb;
use crate::ready::ReadyQueue;
use crate::semaphore::SemaphoreCb;
use crate::stack::{Stack, StackPool};
use crate::sync::PreemptLock;
use crate::thread::{
    Priority, StackOrigin, Thread, ThreadEntry, ThreadInfo, ThreadState, WaitTarget,
};
use crate::trace::{Trace, TraceEvent, WakeReason};

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// Counters kept by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Number of times a different thread became Running.
    pub context_switches: u64,
    /// Times a Running thread lost the CPU to a more urgent one.
    pub preemptions: u64,
    /// Ticks with no Running thread after `start()`.
    pub idle_ticks: u64,
    /// Blocked waits that ended by timeout.
    pub timeouts: u64,
}

/// Result of a request that may suspend the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Satisfied immediately; the caller keeps running.
    Completed,
    /// The caller is now Blocked or Sleeping. The final result is delivered
    /// when it wakes (see `ThreadContext::take_result`).
    Suspended,
}

/// The central scheduler state: every kernel table, the ready structure,
/// the timer list and the current-thread slot.
///
/// ## Design Notes
///
/// - All objects live inline in fixed-size tables (no heap)
/// - Cross references are slot indices or generational handles
/// - `current` names the Running thread, or `None` when idle
pub struct Scheduler {
    pub(crate) config: KernelConfig,
    pub(crate) threads: [Thread; MAX_THREADS],
    pub(crate) ready: ReadyQueue,
    /// Sleeping threads and timed waits, ordered by wake tick.
    pub(crate) timers: ThreadList,
    pub(crate) clock: Clock,
    pub(crate) current: Option<usize>,
    pub(crate) mutexes: [MutexCb; MAX_MUTEXES],
    pub(crate) semaphores: [SemaphoreCb; MAX_SEMAPHORES],
    pub(crate) stacks: Option<StackPool>,
    pub(crate) preempt: PreemptLock,
    pub(crate) trace: Trace,
    pub(crate) stats: SchedulerStats,
    started: bool,
}

impl Scheduler {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            threads: core::array::from_fn(|_| Thread::empty()),
            ready: ReadyQueue::new(),
            timers: ThreadList::new(LinkKind::Timer),
            clock: Clock::new(),
            current: None,
            mutexes: core::array::from_fn(|_| MutexCb::empty()),
            semaphores: core::array::from_fn(|_| SemaphoreCb::empty()),
            stacks: None,
            preempt: PreemptLock::new(),
            trace: Trace::new(),
            stats: SchedulerStats::default(),
            started: false,
        }
    }

    /// Attach the pool `thread_create` allocates stacks from.
    pub fn with_stack_pool(mut self, pool: StackPool) -> Self {
        self.stacks = Some(pool);
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[inline]
    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut Trace {
        &mut self.trace
    }

    pub fn stack_pool(&self) -> Option<&StackPool> {
        self.stacks.as_ref()
    }

    /// Enable scheduling and select the first thread.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!("scheduler started, {} thread(s) ready", self.ready.len());
        self.schedule();
    }

    // -----------------------------------------------------------------------
    // Handles
    // -----------------------------------------------------------------------

    #[inline]
    pub(crate) fn thread_id(&self, index: usize) -> ThreadId {
        ThreadId::new(index, self.threads[index].generation)
    }

    pub(crate) fn thread_index(&self, id: ThreadId) -> KernelResult<usize> {
        let index = id.index();
        match self.threads.get(index) {
            Some(thread) if thread.active && thread.generation == id.generation() => Ok(index),
            _ => Err(KernelError::InvalidHandle),
        }
    }

    /// Slot of the Running thread.
    pub(crate) fn running_index(&self) -> KernelResult<usize> {
        match self.current {
            Some(index) if self.threads[index].state == ThreadState::Running => Ok(index),
            _ => Err(KernelError::InvalidState),
        }
    }

    /// The Running thread, if any.
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.running_index().ok().map(|index| self.thread_id(index))
    }

    pub fn thread_info(&self, id: ThreadId) -> KernelResult<ThreadInfo> {
        let index = self.thread_index(id)?;
        Ok(ThreadInfo::capture(id, &self.threads[index]))
    }

    /// Snapshot of every allocated thread, in slot order.
    pub fn threads(&self) -> impl Iterator<Item = ThreadInfo> + '_ {
        self.threads
            .iter()
            .enumerate()
            .filter(|(_, thread)| thread.active)
            .map(|(index, thread)| ThreadInfo::capture(self.thread_id(index), thread))
    }

    /// Find a live thread by name.
    pub fn thread_find(&self, name: &str) -> Option<ThreadId> {
        self.threads
            .iter()
            .position(|thread| thread.is_live() && thread.name == name)
            .map(|index| self.thread_id(index))
    }

    /// Number of threads waiting in ready buckets (the Running thread is not
    /// counted).
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Ready threads at `prio`, in the order they will run.
    pub fn ready_at(&self, prio: Priority) -> impl Iterator<Item = ThreadId> + '_ {
        self.ready
            .iter_at(&self.threads, prio)
            .map(|index| self.thread_id(index))
    }

    // -----------------------------------------------------------------------
    // Thread lifecycle
    // -----------------------------------------------------------------------

    /// Create a thread whose stack comes from the attached [`StackPool`].
    /// The thread starts in `Init`; see [`thread_start`](Self::thread_start).
    pub fn thread_create(
        &mut self,
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        stack_size: usize,
        priority: Priority,
        timeslice: u32,
    ) -> KernelResult<ThreadId> {
        Self::check_priority(priority)?;
        if stack_size < MIN_STACK_SIZE {
            return Err(KernelError::InvalidArgument);
        }
        let slot = self.free_thread_slot()?;
        let stack = self
            .stacks
            .as_mut()
            .ok_or(KernelError::Exhausted)?
            .allocate(stack_size)?;
        Ok(self.install(slot, name, entry, arg, stack, StackOrigin::Pool, priority, timeslice))
    }

    /// Create a thread on a caller-supplied stack.
    pub fn thread_init(
        &mut self,
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        stack: Stack,
        priority: Priority,
        timeslice: u32,
    ) -> KernelResult<ThreadId> {
        Self::check_priority(priority)?;
        let slot = self.free_thread_slot()?;
        Ok(self.install(slot, name, entry, arg, stack, StackOrigin::Caller, priority, timeslice))
    }

    fn check_priority(priority: Priority) -> KernelResult<()> {
        if (priority as usize) < MAX_PRIORITIES {
            Ok(())
        } else {
            Err(KernelError::InvalidArgument)
        }
    }

    fn free_thread_slot(&self) -> KernelResult<usize> {
        self.threads
            .iter()
            .position(|thread| !thread.active)
            .ok_or(KernelError::Exhausted)
    }

    #[allow(clippy::too_many_arguments)]
    fn install(
        &mut self,
        slot: usize,
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        stack: Stack,
        origin: StackOrigin,
        priority: Priority,
        timeslice: u32,
    ) -> ThreadId {
        let quota = self.config.effective_timeslice(timeslice);
        self.threads[slot].init(name, entry, arg, priority, quota, stack, origin);
        let id = self.thread_id(slot);
        debug!(
            "created {} '{}' prio {} slice {} stack {}",
            id,
            name,
            priority,
            quota,
            stack.size()
        );
        id
    }

    /// Move an `Init` thread to Ready.
    pub fn thread_start(&mut self, id: ThreadId) -> KernelResult<()> {
        let index = self.thread_index(id)?;
        if self.threads[index].state != ThreadState::Init {
            return Err(KernelError::InvalidState);
        }
        let mut s = self.critical_section();
        s.make_ready(index);
        s.schedule();
        Ok(())
    }

    /// Terminate the Running thread.
    pub fn thread_exit(&mut self) -> KernelResult<()> {
        let index = self.running_index()?;
        self.terminate(index)
    }

    /// Terminate any thread that has not already terminated.
    pub fn thread_delete(&mut self, id: ThreadId) -> KernelResult<()> {
        let index = self.thread_index(id)?;
        self.terminate(index)
    }

    pub(crate) fn terminate(&mut self, index: usize) -> KernelResult<()> {
        let mut guard = self.critical_section();
        let s = &mut *guard;
        match s.threads[index].state {
            ThreadState::Terminated => return Err(KernelError::InvalidState),
            ThreadState::Init => {}
            ThreadState::Ready => {
                s.ready.remove(&mut s.threads, index);
            }
            ThreadState::Running => {
                let dropped = s.preempt.clear_user();
                if dropped > 0 {
                    warn!(
                        "'{}' terminated inside {} critical section(s)",
                        s.threads[index].name, dropped
                    );
                }
            }
            ThreadState::Sleeping => {
                s.timers.remove(&mut s.threads, index);
            }
            ThreadState::Blocked => {
                let target = s.threads[index].blocked_on.take();
                s.timers.remove(&mut s.threads, index);
                if let Some(target) = target {
                    s.dequeue_waiter(target, index);
                    s.recompute_owner_of(target);
                }
            }
        }

        let thread = &mut s.threads[index];
        thread.state = ThreadState::Terminated;
        thread.blocked_on = None;
        thread.wake_tick = None;
        thread.wait_result = None;

        s.release_held_mutexes(index);

        let id = s.thread_id(index);
        let tick = s.now();
        s.trace.record(TraceEvent::Exited { tick, thread: id });
        debug!("{} '{}' terminated", id, s.threads[index].name);
        s.schedule();
        Ok(())
    }

    /// Return the slots of terminated threads that are no longer Running.
    pub(crate) fn reap(&mut self) {
        for index in 0..MAX_THREADS {
            let thread = &self.threads[index];
            if !thread.active || thread.state != ThreadState::Terminated {
                continue;
            }
            if self.current == Some(index) {
                continue;
            }
            trace!("reaping slot {} '{}'", index, thread.name);
            if let Some((stack, StackOrigin::Pool)) = self.threads[index].release_slot() {
                if let Some(pool) = self.stacks.as_mut() {
                    pool.free(stack);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Voluntary suspension
    // -----------------------------------------------------------------------

    /// Give up the CPU to equal-priority peers. The budget is refilled and
    /// the thread goes to the back of its bucket. Ignored while the caller
    /// holds the paired critical section.
    pub fn yield_now(&mut self) -> KernelResult<()> {
        let index = self.running_index()?;
        if self.preempt.user_nesting() > 0 {
            return Ok(());
        }
        let mut s = self.critical_section();
        s.threads[index].refill_timeslice();
        s.make_ready(index);
        s.schedule();
        Ok(())
    }

    /// Put the Running thread to sleep for `ticks`. `0` yields.
    pub fn sleep(&mut self, ticks: u32) -> KernelResult<WaitOutcome> {
        if ticks == 0 {
            return self.yield_now().map(|()| WaitOutcome::Completed);
        }
        let index = self.running_index()?;
        if self.preempt.user_nesting() > 0 {
            return Err(KernelError::InvalidState);
        }
        let mut s = self.critical_section();
        let wake = s.clock.deadline(ticks);
        s.threads[index].state = ThreadState::Sleeping;
        s.arm_timer(index, wake);
        trace!("'{}' sleeps until {}", s.threads[index].name, wake);
        s.schedule();
        Ok(WaitOutcome::Suspended)
    }

    // -----------------------------------------------------------------------
    // Blocking and waking (used by mutex and semaphore)
    // -----------------------------------------------------------------------

    /// Block the Running thread on `target`, FIFO, with an optional
    /// deadline. The caller has already ruled out `NoWait`.
    pub(crate) fn block_current(
        &mut self,
        target: WaitTarget,
        timeout: Timeout,
    ) -> KernelResult<usize> {
        let index = self.running_index()?;
        if self.preempt.user_nesting() > 0 {
            return Err(KernelError::InvalidState);
        }
        let thread = &mut self.threads[index];
        thread.state = ThreadState::Blocked;
        thread.blocked_on = Some(target);
        thread.wait_result = None;
        self.enqueue_waiter(target, index);
        if let Some(wake) = timeout.deadline(&self.clock) {
            self.arm_timer(index, wake);
        }
        self.schedule();
        Ok(index)
    }

    fn arm_timer(&mut self, index: usize, wake: Tick) {
        self.threads[index].wake_tick = Some(wake);
        self.timers
            .insert_sorted(&mut self.threads, index, |thread| thread.wake_tick);
    }

    fn enqueue_waiter(&mut self, target: WaitTarget, index: usize) {
        match target {
            WaitTarget::Mutex(id) => self.mutexes[id.index()]
                .wait_queue
                .push_back(&mut self.threads, index),
            WaitTarget::Semaphore(id) => self.semaphores[id.index()]
                .wait_queue
                .push_back(&mut self.threads, index),
        }
    }

    fn dequeue_waiter(&mut self, target: WaitTarget, index: usize) {
        match target {
            WaitTarget::Mutex(id) => self.mutexes[id.index()]
                .wait_queue
                .remove(&mut self.threads, index),
            WaitTarget::Semaphore(id) => self.semaphores[id.index()]
                .wait_queue
                .remove(&mut self.threads, index),
        };
    }

    /// A waiter left a mutex queue without acquiring it: the owner may have
    /// lost its only boost source.
    fn recompute_owner_of(&mut self, target: WaitTarget) {
        if let WaitTarget::Mutex(id) = target {
            if let Some(owner) = self.mutexes[id.index()].owner {
                self.propagate_priority(owner);
            }
        }
    }

    /// Make a thread that was already unlinked from its wait queue Ready,
    /// delivering `result`.
    pub(crate) fn wake(&mut self, index: usize, result: KernelResult<()>, reason: WakeReason) {
        self.timers.remove(&mut self.threads, index);
        let thread = &mut self.threads[index];
        thread.wake_tick = None;
        thread.blocked_on = None;
        thread.wait_result = Some(result);
        self.make_ready(index);

        let id = self.thread_id(index);
        let tick = self.now();
        self.trace.record(TraceEvent::Woken {
            tick,
            thread: id,
            reason,
        });
        debug!("{} '{}' woken: {:?}", id, self.threads[index].name, reason);
    }

    /// Abort a blocked wait with `error`, recomputing the boost the waiter
    /// was providing.
    pub(crate) fn abort_wait(&mut self, index: usize, error: KernelError, reason: WakeReason) {
        let Some(target) = self.threads[index].blocked_on else {
            return;
        };
        self.dequeue_waiter(target, index);
        self.wake(index, Err(error), reason);
        self.recompute_owner_of(target);
    }

    pub(crate) fn make_ready(&mut self, index: usize) {
        self.threads[index].state = ThreadState::Ready;
        self.threads[index].preempted = false;
        self.ready.push_back(&mut self.threads, index);
    }

    /// Change a thread's effective priority, moving it between ready
    /// buckets if needed. Returns `false` if it was already `prio`.
    pub(crate) fn set_effective_priority(&mut self, index: usize, prio: Priority) -> bool {
        let old = self.threads[index].effective_priority;
        if old == prio {
            return false;
        }
        if self.threads[index].state == ThreadState::Ready {
            self.ready.remove(&mut self.threads, index);
            self.threads[index].effective_priority = prio;
            // A preempted thread keeps its place ahead of its new peers.
            if self.threads[index].preempted {
                self.ready.push_front(&mut self.threads, index);
            } else {
                self.ready.push_back(&mut self.threads, index);
            }
        } else {
            self.threads[index].effective_priority = prio;
        }

        let id = self.thread_id(index);
        let tick = self.now();
        self.trace.record(TraceEvent::PriorityChanged {
            tick,
            thread: id,
            from: old,
            to: prio,
        });
        debug!(
            "{} '{}' priority {} -> {}",
            id, self.threads[index].name, old, prio
        );
        true
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Pick the thread to run. Deferred while a critical section is held.
    pub fn schedule(&mut self) {
        if !self.started {
            return;
        }
        if self.preempt.is_locked() {
            self.preempt.defer();
            return;
        }

        let running = self.running_index().ok();
        let Some(next) = self.ready.peek() else {
            if running.is_none() {
                self.current = None;
            }
            return;
        };

        match running {
            Some(current) => {
                let current_prio = self.threads[current].effective_priority;
                if self.threads[next].effective_priority < current_prio {
                    self.threads[current].state = ThreadState::Ready;
                    self.threads[current].preempted = true;
                    self.ready.push_front(&mut self.threads, current);
                    self.stats.preemptions += 1;
                    let id = self.thread_id(current);
                    let tick = self.now();
                    self.trace
                        .record(TraceEvent::Preempted { tick, thread: id });
                    self.switch_to(next);
                }
            }
            None => self.switch_to(next),
        }
    }

    fn switch_to(&mut self, next: usize) {
        self.ready.remove(&mut self.threads, next);
        self.threads[next].state = ThreadState::Running;
        self.threads[next].preempted = false;
        let previous = self.current.replace(next);
        if previous == Some(next) {
            return;
        }

        self.stats.context_switches += 1;
        let to = self.thread_id(next);
        let from = previous
            .filter(|&index| self.threads[index].active)
            .map(|index| self.thread_id(index));
        if self.config.trace_switches {
            let tick = self.now();
            self.trace.record(TraceEvent::Switch { tick, from, to });
        }
        trace!("switch {:?} -> {} '{}'", from, to, self.threads[next].name);
    }

    // -----------------------------------------------------------------------
    // Tick path
    // -----------------------------------------------------------------------

    /// Advance time by one tick. Called from the timer interrupt (or the
    /// simulation loop).
    pub fn tick(&mut self) {
        let now = self.clock.advance();
        let mut s = self.critical_section();
        s.account_timeslice();
        s.expire_timers(now);
        s.reap();
        s.schedule();
    }

    fn account_timeslice(&mut self) {
        let Ok(index) = self.running_index() else {
            if self.started {
                self.stats.idle_ticks += 1;
            }
            return;
        };
        let thread = &mut self.threads[index];
        thread.run_ticks += 1;
        thread.timeslice_budget = thread.timeslice_budget.saturating_sub(1);
        if thread.timeslice_budget == 0 {
            self.rotate_if_expired();
        }
    }

    /// Rotate the Running thread to the back of its bucket if its budget is
    /// spent. Postponed while the paired critical section is held.
    fn rotate_if_expired(&mut self) {
        let Ok(index) = self.running_index() else {
            return;
        };
        if self.threads[index].timeslice_budget > 0 {
            return;
        }
        if self.preempt.user_nesting() > 0 {
            self.preempt.defer();
            return;
        }
        self.threads[index].refill_timeslice();
        self.make_ready(index);
        trace!("'{}' timeslice expired", self.threads[index].name);
        self.schedule();
    }

    fn expire_timers(&mut self, now: Tick) {
        while let Some(head) = self.timers.front() {
            match self.threads[head].wake_tick {
                Some(wake) if wake <= now => {}
                _ => break,
            }
            self.timers.remove(&mut self.threads, head);
            match self.threads[head].state {
                ThreadState::Sleeping => self.wake(head, Ok(()), WakeReason::Timeout),
                ThreadState::Blocked => {
                    self.stats.timeouts += 1;
                    self.abort_wait(head, KernelError::Timeout, WakeReason::Timeout);
                }
                _ => self.threads[head].wake_tick = None,
            }
        }
    }

    /// Last critical level released with work pending.
    pub(crate) fn resume_preemption(&mut self) {
        self.rotate_if_expired();
        self.schedule();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ThreadContext;
    use crate::stack::test_stack;
    use crate::thread::Step;

    fn busy(_: &mut ThreadContext<'_>) -> Step {
        Step::Busy
    }

    fn spawn(s: &mut Scheduler, name: &'static str, prio: Priority, slice: u32) -> ThreadId {
        let id = s
            .thread_init(name, busy, 0, test_stack(), prio, slice)
            .unwrap();
        s.thread_start(id).unwrap();
        id
    }

    #[test]
    fn test_highest_priority_runs() {
        let mut s = Scheduler::default();
        let low = spawn(&mut s, "low", 20, 5);
        let high = spawn(&mut s, "high", 5, 5);
        assert_eq!(s.current_thread(), None);

        s.start();
        assert_eq!(s.current_thread(), Some(high));
        assert_eq!(s.thread_info(low).unwrap().state, ThreadState::Ready);
    }

    #[test]
    fn test_preemption_on_start() {
        let mut s = Scheduler::default();
        let low = spawn(&mut s, "low", 20, 5);
        s.start();
        assert_eq!(s.current_thread(), Some(low));

        let high = spawn(&mut s, "high", 3, 5);
        assert_eq!(s.current_thread(), Some(high));
        assert_eq!(s.stats().preemptions, 1);
        // The preempted thread kept its place at the head of its bucket.
        assert_eq!(s.ready_at(20).next(), Some(low));
    }

    #[test]
    fn test_equal_priority_does_not_preempt() {
        let mut s = Scheduler::default();
        let a = spawn(&mut s, "a", 10, 3);
        s.start();
        let b = spawn(&mut s, "b", 10, 3);
        assert_eq!(s.current_thread(), Some(a));
        assert_eq!(s.ready_at(10).collect::<Vec<_>>(), [b]);
    }

    #[test]
    fn test_timeslice_rotation() {
        let mut s = Scheduler::default();
        let a = spawn(&mut s, "a", 10, 2);
        let b = spawn(&mut s, "b", 10, 3);
        s.start();

        let mut order = Vec::new();
        for _ in 0..10 {
            order.push(s.current_thread().unwrap());
            s.tick();
        }
        assert_eq!(order, [a, a, b, b, b, a, a, b, b, b]);
        assert_eq!(s.thread_info(a).unwrap().run_ticks, 4);
    }

    #[test]
    fn test_round_robin_many_equal_threads() {
        let mut s = Scheduler::default();
        let ids = [
            spawn(&mut s, "a", 12, 2),
            spawn(&mut s, "b", 12, 2),
            spawn(&mut s, "c", 12, 2),
            spawn(&mut s, "d", 12, 2),
        ];
        s.start();

        let mut order = Vec::new();
        for _ in 0..24 {
            order.push(s.current_thread().unwrap());
            s.tick();
        }
        // Three full cycles in creation order, two ticks each.
        let expected: Vec<ThreadId> = (0..24).map(|t| ids[(t / 2) % ids.len()]).collect();
        assert_eq!(order, expected);
        for id in ids {
            assert_eq!(s.thread_info(id).unwrap().run_ticks, 6);
        }
    }

    #[test]
    fn test_yield_rotates_to_back() {
        let mut s = Scheduler::default();
        let a = spawn(&mut s, "a", 10, 5);
        let b = spawn(&mut s, "b", 10, 5);
        s.start();
        s.tick();
        assert_eq!(s.thread_info(a).unwrap().timeslice_budget, 4);

        s.yield_now().unwrap();
        assert_eq!(s.current_thread(), Some(b));
        assert_eq!(s.thread_info(a).unwrap().timeslice_budget, 5);
    }

    #[test]
    fn test_sleep_wakes_on_tick() {
        let mut s = Scheduler::default();
        let a = spawn(&mut s, "a", 4, 5);
        let idle = spawn(&mut s, "idle", 30, 5);
        s.start();

        assert_eq!(s.sleep(3), Ok(WaitOutcome::Suspended));
        assert_eq!(s.current_thread(), Some(idle));
        assert_eq!(s.thread_info(a).unwrap().wake_tick, Some(3));

        s.tick();
        s.tick();
        assert_eq!(s.thread_info(a).unwrap().state, ThreadState::Sleeping);
        s.tick();
        assert_eq!(s.current_thread(), Some(a));
    }

    #[test]
    fn test_idle_when_nothing_ready() {
        let mut s = Scheduler::default();
        s.start();
        assert_eq!(s.current_thread(), None);
        s.tick();
        s.tick();
        assert_eq!(s.stats().idle_ticks, 2);
    }

    #[test]
    fn test_start_requires_init_state() {
        let mut s = Scheduler::default();
        let a = spawn(&mut s, "a", 4, 5);
        assert_eq!(s.thread_start(a), Err(KernelError::InvalidState));
    }

    #[test]
    fn test_invalid_priority_rejected() {
        let mut s = Scheduler::default();
        let result = s.thread_init("bad", busy, 0, test_stack(), MAX_PRIORITIES as Priority, 5);
        assert_eq!(result, Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_zero_timeslice_uses_default() {
        let mut s = Scheduler::default();
        let a = spawn(&mut s, "a", 4, 0);
        assert_eq!(
            s.thread_info(a).unwrap().timeslice_quota,
            s.config().default_timeslice
        );
    }

    #[test]
    fn test_slot_table_exhaustion() {
        let mut s = Scheduler::default();
        for _ in 0..MAX_THREADS {
            s.thread_init("t", busy, 0, test_stack(), 10, 5).unwrap();
        }
        assert_eq!(
            s.thread_init("t", busy, 0, test_stack(), 10, 5),
            Err(KernelError::Exhausted)
        );
    }

    #[test]
    fn test_create_without_pool_is_exhausted() {
        let mut s = Scheduler::default();
        assert_eq!(
            s.thread_create("t", busy, 0, 512, 10, 5),
            Err(KernelError::Exhausted)
        );
    }

    #[test]
    fn test_delete_reaps_and_invalidates_handle() {
        let pool = StackPool::new(std::vec![0u8; 4096].leak(), 1024).unwrap();
        let mut s = Scheduler::default().with_stack_pool(pool);
        let free_before = s.stack_pool().unwrap().available();
        let a = s.thread_create("a", busy, 0, 512, 10, 5).unwrap();
        s.thread_start(a).unwrap();
        s.start();
        assert_eq!(s.stack_pool().unwrap().available(), free_before - 1);

        s.thread_delete(a).unwrap();
        assert_eq!(s.thread_delete(a), Err(KernelError::InvalidState));
        assert_eq!(s.current_thread(), None);

        s.tick();
        assert_eq!(s.thread_info(a), Err(KernelError::InvalidHandle));
        assert_eq!(s.stack_pool().unwrap().available(), free_before);

        // The slot is reused under a new generation.
        let b = s.thread_create("b", busy, 0, 512, 10, 5).unwrap();
        assert_eq!(b.index(), a.index());
        assert_ne!(b, a);
    }

    #[test]
    fn test_running_thread_reaped_after_switch() {
        let mut s = Scheduler::default();
        let a = spawn(&mut s, "a", 4, 5);
        let b = spawn(&mut s, "b", 8, 5);
        s.start();
        s.thread_exit().unwrap();
        assert_eq!(s.current_thread(), Some(b));
        assert_eq!(s.thread_info(a).unwrap().state, ThreadState::Terminated);
        s.tick();
        assert!(s.thread_info(a).is_err());
    }

    #[test]
    fn test_thread_find_by_name() {
        let mut s = Scheduler::default();
        let a = spawn(&mut s, "worker", 4, 5);
        assert_eq!(s.thread_find("worker"), Some(a));
        assert_eq!(s.thread_find("missing"), None);
    }
}
