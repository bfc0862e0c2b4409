//! # Dispatch Loop
//!
//! Runs thread entry points. Each dispatch invokes the Running thread's
//! entry with a [`ThreadContext`] and applies the [`Step`] it returns. The
//! whole step runs inside a scheduler critical section, so any reschedule
//! it causes (a release that wakes a more urgent thread, say) takes effect
//! at the end of the step and never in the middle of it.
//!
//! A `Busy` step holds the CPU for the rest of the current tick. Every
//! other step is instantaneous, so several may run within one tick, up to
//! `KernelConfig::max_steps_per_tick`.

use log::{info, warn};

use crate::clock::Tick;
use crate::error::{KernelError, KernelResult};
use crate::handle::{MutexId, SemaphoreId, ThreadId};
use crate::mutex::MutexInfo;
use crate::scheduler::{Scheduler, WaitOutcome};
use crate::semaphore::SemaphoreInfo;
use crate::thread::{Step, ThreadInfo};
use crate::trace::TraceEvent;

/// What the CPU is doing for the remainder of the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A thread is busy until the next tick.
    Busy(ThreadId),
    /// No thread is Running.
    Idle,
}

/// The view a thread has of the kernel while its entry point runs.
pub struct ThreadContext<'a> {
    sched: &'a mut Scheduler,
    index: usize,
}

impl<'a> ThreadContext<'a> {
    pub(crate) fn new(sched: &'a mut Scheduler, index: usize) -> Self {
        Self { sched, index }
    }

    /// Handle of the calling thread.
    pub fn id(&self) -> ThreadId {
        self.sched.thread_id(self.index)
    }

    pub fn name(&self) -> &'static str {
        self.sched.threads[self.index].name
    }

    /// Argument given at creation.
    pub fn arg(&self) -> usize {
        self.sched.threads[self.index].arg
    }

    pub fn now(&self) -> Tick {
        self.sched.now()
    }

    /// Resume point saved by the previous step. `0` on first dispatch.
    pub fn pc(&self) -> u32 {
        self.sched.threads[self.index].context.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.sched.threads[self.index].context.pc = pc;
    }

    /// Save `pc` as the resume point and return `step`.
    pub fn resume_at(&mut self, pc: u32, step: Step) -> Step {
        self.set_pc(pc);
        step
    }

    pub fn regs(&self) -> &[usize] {
        &self.sched.threads[self.index].context.regs
    }

    pub fn regs_mut(&mut self) -> &mut [usize] {
        &mut self.sched.threads[self.index].context.regs
    }

    /// Outcome of the last blocking step, once. `None` if nothing is
    /// pending.
    pub fn take_result(&mut self) -> Option<KernelResult<()>> {
        self.sched.threads[self.index].wait_result.take()
    }

    pub fn thread_info(&self, id: ThreadId) -> KernelResult<ThreadInfo> {
        self.sched.thread_info(id)
    }

    pub fn thread_find(&self, name: &str) -> Option<ThreadId> {
        self.sched.thread_find(name)
    }

    pub fn mutex_find(&self, name: &str) -> Option<MutexId> {
        self.sched.mutex_find(name)
    }

    pub fn mutex_info(&self, id: MutexId) -> KernelResult<MutexInfo> {
        self.sched.mutex_info(id)
    }

    pub fn mutex_release(&mut self, id: MutexId) -> KernelResult<()> {
        self.sched.mutex_release(id)
    }

    pub fn semaphore_find(&self, name: &str) -> Option<SemaphoreId> {
        self.sched.semaphore_find(name)
    }

    pub fn semaphore_info(&self, id: SemaphoreId) -> KernelResult<SemaphoreInfo> {
        self.sched.semaphore_info(id)
    }

    pub fn semaphore_release(&mut self, id: SemaphoreId) -> KernelResult<()> {
        self.sched.semaphore_release(id)
    }

    pub fn semaphore_delete(&mut self, id: SemaphoreId) -> KernelResult<()> {
        self.sched.semaphore_delete(id)
    }

    pub fn enter_critical(&mut self) {
        self.sched.enter_critical();
    }

    pub fn exit_critical(&mut self) -> KernelResult<()> {
        self.sched.exit_critical()
    }

    /// Record an observation in the trace and log it.
    pub fn mark(&mut self, tag: &'static str, value: i64) {
        let thread = self.id();
        let tick = self.now();
        info!("[{}] {} {} = {}", tick, self.name(), tag, value);
        self.sched.trace.record(TraceEvent::Mark {
            tick,
            thread,
            tag,
            value,
        });
    }

    /// The whole scheduler, for operations not mirrored here.
    pub fn scheduler(&mut self) -> &mut Scheduler {
        self.sched
    }
}

impl Scheduler {
    /// Dispatch the Running thread until the CPU is busy for the rest of
    /// the tick or nothing is Running.
    pub fn run_once(&mut self) -> RunOutcome {
        if !self.is_started() {
            return RunOutcome::Idle;
        }
        let budget = self.config.max_steps_per_tick.max(1);
        for _ in 0..budget {
            let Ok(index) = self.running_index() else {
                return RunOutcome::Idle;
            };
            let step = self.dispatch(index);
            if step == Step::Busy && self.running_index() == Ok(index) {
                return RunOutcome::Busy(self.thread_id(index));
            }
        }
        match self.running_index() {
            Ok(index) => {
                warn!(
                    "'{}' reached {} steps in one tick",
                    self.threads[index].name, budget
                );
                RunOutcome::Busy(self.thread_id(index))
            }
            Err(_) => RunOutcome::Idle,
        }
    }

    /// Run `ticks` ticks: dispatch, then advance time.
    pub fn run_ticks(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.run_once();
            self.tick();
        }
    }

    /// Run until `done` holds or `max_ticks` elapse. Returns whether `done`
    /// was reached.
    pub fn run_until<F>(&mut self, max_ticks: u64, mut done: F) -> bool
    where
        F: FnMut(&Scheduler) -> bool,
    {
        for _ in 0..max_ticks {
            if done(self) {
                return true;
            }
            self.run_once();
            self.tick();
        }
        done(self)
    }

    fn dispatch(&mut self, index: usize) -> Step {
        let entry = self.threads[index].entry;
        let mut guard = self.critical_section();
        let step = match entry {
            Some(entry) => entry(&mut ThreadContext::new(&mut guard, index)),
            None => Step::Exit,
        };
        guard.apply_step(index, step);
        step
    }

    fn apply_step(&mut self, index: usize, step: Step) {
        if self.running_index() != Ok(index) {
            // The thread terminated or blocked itself through its context.
            return;
        }
        let outcome = match step {
            Step::Busy => return,
            Step::Exit => {
                if let Err(err) = self.terminate(index) {
                    warn!("exit of '{}' failed: {}", self.threads[index].name, err);
                }
                return;
            }
            Step::Yield => self.yield_now().map(|()| WaitOutcome::Completed),
            Step::Sleep(ticks) => self.sleep(ticks),
            Step::TakeMutex(id, timeout) => self.mutex_take(id, timeout),
            Step::TakeSemaphore(id, timeout) => self.semaphore_take(id, timeout),
        };
        let result = match outcome {
            Ok(WaitOutcome::Suspended) => return,
            Ok(WaitOutcome::Completed) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(KernelError::InvalidHandle | KernelError::InvalidState) = result {
            warn!("'{}' {:?} failed: {:?}", self.threads[index].name, step, result);
        }
        self.threads[index].wait_result = Some(result);
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
