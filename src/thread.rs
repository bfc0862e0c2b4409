//! # Thread Control Block
//!
//! Defines the thread model for PiOS: the TCB stored in the scheduler's
//! fixed slot table, the thread state machine, the step protocol through
//! which a thread asks to be suspended, and the read-only [`ThreadInfo`]
//! snapshot handed out to callers.
//!
//! ## Step protocol
//!
//! A thread's entry point is an ordinary function invoked by the dispatch
//! loop each time the thread is Running. It does a bounded amount of work
//! and returns a [`Step`] naming the suspension point it reached. Anything
//! the thread needs to remember between invocations lives in its
//! [`SavedContext`] (a resume point plus eight saved words).

use crate::clock::{Tick, Timeout};
use crate::config::CONTEXT_WORDS;
use crate::dispatch::ThreadContext;
use crate::error::KernelResult;
use crate::handle::{MutexId, SemaphoreId, ThreadId};
use crate::list::Link;
use crate::stack::Stack;

/// Thread priority. Smaller values are more urgent; `0` is the highest.
pub type Priority = u8;

/// Entry point of a thread. Called once per dispatch while the thread is
/// Running; the returned [`Step`] is the thread's next suspension point.
pub type ThreadEntry = fn(&mut ThreadContext<'_>) -> Step;

// ---------------------------------------------------------------------------
// Thread state machine
// ---------------------------------------------------------------------------

/// Execution state of a thread.
///
/// ```text
///   ┌──────┐ start  ┌───────┐  schedule()   ┌─────────┐
///   │ Init │ ─────► │ Ready │ ────────────► │ Running │
///   └──────┘        └───────┘ ◄──────────── └─────────┘
///                     ▲   ▲  preempt/rotate │   │   │
///                     │   │                 │   │   │ exit / delete
///       unblock/timeout│   │ wake   ┌───────┘   │   ▼
///                 ┌─────────┐ ┌──────────┐     │ ┌────────────┐
///                 │ Blocked │ │ Sleeping │ ◄───┘ │ Terminated │
///                 └─────────┘ └──────────┘       └────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created but not yet started.
    Init,
    /// Runnable, waiting in its priority bucket.
    Ready,
    /// Currently executing. At most one thread is Running.
    Running,
    /// Waiting in a mutex or semaphore wait queue.
    Blocked,
    /// Delayed until its wake tick.
    Sleeping,
    /// Finished; the slot is reclaimed once nothing references it.
    Terminated,
}

/// The resource a Blocked thread waits on. A handle, never an owning
/// reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    Mutex(MutexId),
    Semaphore(SemaphoreId),
}

/// Suspension request returned by a thread's entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep the CPU for the rest of the current tick.
    Busy,
    /// Give up the CPU to equal-priority peers.
    Yield,
    /// Sleep for the given number of ticks. `Sleep(0)` yields.
    Sleep(u32),
    /// Acquire a mutex, blocking up to the timeout.
    TakeMutex(MutexId, Timeout),
    /// Take a semaphore unit, blocking up to the timeout.
    TakeSemaphore(SemaphoreId, Timeout),
    /// Terminate the thread.
    Exit,
}

impl Step {
    /// Whether the step may suspend the thread until some other event.
    #[inline]
    pub const fn is_blocking(&self) -> bool {
        matches!(
            self,
            Step::Sleep(_) | Step::TakeMutex(..) | Step::TakeSemaphore(..)
        )
    }
}

// ---------------------------------------------------------------------------
// Saved context
// ---------------------------------------------------------------------------

/// Continuation state of a thread between dispatches. Opaque to the
/// scheduler; only the thread's own entry point interprets it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SavedContext {
    /// Resume point, interpreted by the entry point as a program counter.
    pub pc: u32,
    /// General-purpose saved words, mirroring R4–R11.
    pub regs: [usize; CONTEXT_WORDS],
}

/// Where a thread's stack came from, so reaping returns it correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StackOrigin {
    /// Allocated from the scheduler's stack pool by `thread_create`.
    Pool,
    /// Supplied by the caller of `thread_init`.
    Caller,
}

// ---------------------------------------------------------------------------
// Thread Control Block
// ---------------------------------------------------------------------------

/// Thread Control Block. TCBs live in a fixed-size table inside the
/// scheduler; list membership is expressed by the intrusive links.
#[derive(Debug)]
pub struct Thread {
    /// Whether this slot holds a thread (true) or is free (false).
    pub(crate) active: bool,
    /// Bumped each time the slot is reclaimed.
    pub(crate) generation: u16,
    pub(crate) name: &'static str,
    pub(crate) entry: Option<ThreadEntry>,
    pub(crate) arg: usize,
    pub(crate) state: ThreadState,
    /// Priority given at creation. Never changes.
    pub(crate) base_priority: Priority,
    /// Scheduling priority, possibly raised by inheritance.
    pub(crate) effective_priority: Priority,
    pub(crate) timeslice_quota: u32,
    pub(crate) timeslice_budget: u32,
    pub(crate) stack: Option<Stack>,
    pub(crate) stack_origin: StackOrigin,
    pub(crate) context: SavedContext,
    pub(crate) blocked_on: Option<WaitTarget>,
    pub(crate) wake_tick: Option<Tick>,
    /// Outcome of the last blocking request, consumed by the thread.
    pub(crate) wait_result: Option<KernelResult<()>>,
    /// Ready bucket or wait queue membership.
    pub(crate) queue_link: Link,
    /// Timer list membership (Sleeping and timed waits).
    pub(crate) timer_link: Link,
    /// Ticks spent Running.
    pub(crate) run_ticks: u64,
    /// Ready after losing the CPU mid-slice; holds the head of its bucket.
    pub(crate) preempted: bool,
}

impl Thread {
    /// An unallocated slot.
    pub const fn empty() -> Self {
        Self {
            active: false,
            generation: 0,
            name: "",
            entry: None,
            arg: 0,
            state: ThreadState::Terminated,
            base_priority: 0,
            effective_priority: 0,
            timeslice_quota: 0,
            timeslice_budget: 0,
            stack: None,
            stack_origin: StackOrigin::Caller,
            context: SavedContext {
                pc: 0,
                regs: [0; CONTEXT_WORDS],
            },
            blocked_on: None,
            wake_tick: None,
            wait_result: None,
            queue_link: Link::new(),
            timer_link: Link::new(),
            run_ticks: 0,
            preempted: false,
        }
    }

    /// Fill a free slot. The thread starts in `Init` with a full budget.
    pub(crate) fn init(
        &mut self,
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        priority: Priority,
        quota: u32,
        stack: Stack,
        origin: StackOrigin,
    ) {
        self.active = true;
        self.name = name;
        self.entry = Some(entry);
        self.arg = arg;
        self.state = ThreadState::Init;
        self.base_priority = priority;
        self.effective_priority = priority;
        self.timeslice_quota = quota;
        self.timeslice_budget = quota;
        self.stack = Some(stack);
        self.stack_origin = origin;
        self.context = SavedContext::default();
        self.blocked_on = None;
        self.wake_tick = None;
        self.wait_result = None;
        self.queue_link = Link::new();
        self.timer_link = Link::new();
        self.run_ticks = 0;
        self.preempted = false;
    }

    /// Return the slot to the free pool, invalidating outstanding handles.
    /// Yields the stack so the caller can hand it back to its provider.
    pub(crate) fn release_slot(&mut self) -> Option<(Stack, StackOrigin)> {
        let stack = self.stack.take().map(|stack| (stack, self.stack_origin));
        let generation = self.generation.wrapping_add(1);
        *self = Self::empty();
        self.generation = generation;
        stack
    }

    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        self.active && self.state != ThreadState::Terminated
    }

    /// Whether the thread currently runs above its base priority.
    #[inline]
    pub fn is_boosted(&self) -> bool {
        self.effective_priority < self.base_priority
    }

    /// Restore the full quota, e.g. after rotation or a voluntary yield.
    #[inline]
    pub(crate) fn refill_timeslice(&mut self) {
        self.timeslice_budget = self.timeslice_quota;
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only view of a thread, as returned by `Scheduler::thread_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: &'static str,
    pub state: ThreadState,
    pub base_priority: Priority,
    /// Current scheduling priority, including any inherited boost.
    pub effective_priority: Priority,
    pub timeslice_budget: u32,
    pub timeslice_quota: u32,
    pub blocked_on: Option<WaitTarget>,
    pub wake_tick: Option<Tick>,
    pub run_ticks: u64,
    pub stack_size: usize,
}

impl ThreadInfo {
    pub(crate) fn capture(id: ThreadId, thread: &Thread) -> Self {
        Self {
            id,
            name: thread.name,
            state: thread.state,
            base_priority: thread.base_priority,
            effective_priority: thread.effective_priority,
            timeslice_budget: thread.timeslice_budget,
            timeslice_quota: thread.timeslice_quota,
            blocked_on: thread.blocked_on,
            wake_tick: thread.wake_tick,
            run_ticks: thread.run_ticks,
            stack_size: thread.stack.map_or(0, |stack| stack.size()),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
