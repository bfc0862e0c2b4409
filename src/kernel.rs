//! # Kernel
//!
//! The default global scheduler instance and the free-function API over
//! it, for firmware where the SysTick handler and the main loop share one
//! scheduler.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init(scheduler)    ← Install the instance
//!         ├─► kernel::thread_create()    ← Register threads (×N)
//!         ├─► kernel::thread_start()
//!         └─► arch::cortex_m4::run()     ← Configure SysTick, dispatch
//!               forever (no return)
//! ```
//!
//! Every function enters an interrupt-level critical section, so the
//! instance is never observed mid-update by the tick handler. Thread entry
//! points must use their `ThreadContext` instead of these functions: the
//! instance is already borrowed while a thread runs and a nested call
//! fails with `InvalidState`.

use core::cell::RefCell;

use critical_section::Mutex;
use log::warn;

use crate::clock::Tick;
use crate::dispatch::RunOutcome;
use crate::error::{KernelError, KernelResult};
use crate::handle::{MutexId, SemaphoreId, ThreadId};
use crate::scheduler::Scheduler;
use crate::semaphore::SemaphoreInfo;
use crate::stack::Stack;
use crate::sync;
use crate::thread::{Priority, ThreadEntry, ThreadInfo};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

static KERNEL: Mutex<RefCell<Option<Scheduler>>> = Mutex::new(RefCell::new(None));

/// Install `scheduler` as the global instance. Fails with `InvalidState`
/// if one is already installed.
pub fn init(scheduler: Scheduler) -> KernelResult<()> {
    sync::critical_section(|cs| {
        let mut slot = KERNEL
            .borrow(cs)
            .try_borrow_mut()
            .map_err(|_| KernelError::InvalidState)?;
        if slot.is_some() {
            return Err(KernelError::InvalidState);
        }
        *slot = Some(scheduler);
        Ok(())
    })
}

/// Remove and return the global instance.
pub fn take() -> Option<Scheduler> {
    sync::critical_section(|cs| {
        KERNEL
            .borrow(cs)
            .try_borrow_mut()
            .ok()
            .and_then(|mut slot| slot.take())
    })
}

/// Run `f` on the global instance with interrupts masked.
pub fn with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> KernelResult<R> {
    sync::critical_section(|cs| {
        let mut slot = KERNEL
            .borrow(cs)
            .try_borrow_mut()
            .map_err(|_| KernelError::InvalidState)?;
        let scheduler = slot.as_mut().ok_or(KernelError::InvalidState)?;
        Ok(f(scheduler))
    })
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Timer entry point. A tick that finds no usable instance is dropped.
pub fn tick() {
    if let Err(err) = with(Scheduler::tick) {
        warn!("tick dropped: {}", err);
    }
}

pub fn start() -> KernelResult<()> {
    with(Scheduler::start)
}

pub fn run_once() -> KernelResult<RunOutcome> {
    with(Scheduler::run_once)
}

pub fn now() -> KernelResult<Tick> {
    with(|s| s.now())
}

pub fn thread_create(
    name: &'static str,
    entry: ThreadEntry,
    arg: usize,
    stack_size: usize,
    priority: Priority,
    timeslice: u32,
) -> KernelResult<ThreadId> {
    with(|s| s.thread_create(name, entry, arg, stack_size, priority, timeslice))?
}

pub fn thread_init(
    name: &'static str,
    entry: ThreadEntry,
    arg: usize,
    stack: Stack,
    priority: Priority,
    timeslice: u32,
) -> KernelResult<ThreadId> {
    with(|s| s.thread_init(name, entry, arg, stack, priority, timeslice))?
}

pub fn thread_start(id: ThreadId) -> KernelResult<()> {
    with(|s| s.thread_start(id))?
}

pub fn thread_delete(id: ThreadId) -> KernelResult<()> {
    with(|s| s.thread_delete(id))?
}

pub fn thread_info(id: ThreadId) -> KernelResult<ThreadInfo> {
    with(|s| s.thread_info(id))?
}

pub fn mutex_create(name: &'static str) -> KernelResult<MutexId> {
    with(|s| s.mutex_create(name))?
}

pub fn mutex_delete(id: MutexId) -> KernelResult<()> {
    with(|s| s.mutex_delete(id))?
}

pub fn semaphore_create(name: &'static str, initial: u32) -> KernelResult<SemaphoreId> {
    with(|s| s.semaphore_create(name, initial))?
}

pub fn semaphore_info(id: SemaphoreId) -> KernelResult<SemaphoreInfo> {
    with(|s| s.semaphore_info(id))?
}

/// Release from interrupt or main-loop context.
pub fn semaphore_release(id: SemaphoreId) -> KernelResult<()> {
    with(|s| s.semaphore_release(id))?
}

pub fn semaphore_delete(id: SemaphoreId) -> KernelResult<()> {
    with(|s| s.semaphore_delete(id))?
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
