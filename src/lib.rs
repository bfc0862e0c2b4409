//! # PiOS — Priority-Inheritance Operating System
//!
//! The scheduler core of a small preemptive RTOS for ARM Cortex-M4
//! microcontrollers, runnable in simulated time on a host.
//!
//! ## Overview
//!
//! PiOS schedules threads by fixed priority (0 is the highest) with
//! round robin inside a priority level. It provides:
//!
//! - **Thread lifecycle**: create/init, start, exit, delete, sleep, yield
//! - **Mutexes** with recursion and *transitive* priority inheritance
//! - **Counting semaphores** with FIFO wakeup and timeouts
//! - **Critical sections** that defer every reschedule until the outermost
//!   section ends
//! - **Tick processing**: timeslice accounting and timer expiry
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │          Application Threads (samples/*.rs)             │
//! ├────────────────────────────────────────────────────────┤
//! │        Global Kernel API (kernel.rs)                    │
//! │    init() · with() · tick() · run_once() · start()     │
//! ├────────────────────────────────────────────────────────┤
//! │        Dispatcher (dispatch.rs)                         │
//! │    ThreadContext · Step · run_once() · run_until()     │
//! ├──────────────┬───────────────┬────────────────────────┤
//! │  Scheduler   │  Mutex        │  Semaphore             │
//! │  scheduler.rs│  mutex.rs     │  semaphore.rs          │
//! │  ─ schedule()│  ─ take()     │  ─ take()              │
//! │  ─ tick()    │  ─ release()  │  ─ release()           │
//! │  ─ sleep()   │  ─ inherit    │  ─ delete()            │
//! ├──────────────┴───────────────┴────────────────────────┤
//! │  Ready Queue (ready.rs) · Lists (list.rs) · Sync      │
//! │  bitmap + FIFO buckets   intrusive links  (sync.rs)   │
//! ├────────────────────────────────────────────────────────┤
//! │  Thread Model (thread.rs) · Stacks · Clock · Trace     │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch Port (arch/cortex_m4.rs)                │
//! │         SysTick · WFI idle · interrupt priorities      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Execution Model
//!
//! A thread is a step function over its saved context. Each dispatch runs
//! one step of the current thread inside a critical section and applies
//! the [`Step`] it returns (keep running, yield, sleep, block on a mutex
//! or semaphore, exit). Blocking results are delivered on the next step.
//! On the host the same code runs under a simulated clock, so scheduling
//! scenarios are deterministic and testable.
//!
//! ## Scheduling Rules
//!
//! 1. The running thread always has the best effective priority among
//!    runnable threads, unless preemption is locked.
//! 2. Equal priorities never preempt each other; they rotate on timeslice
//!    expiry or on yield.
//! 3. A mutex owner runs at least at the priority of every thread waiting,
//!    directly or transitively, on a mutex it holds.
//! 4. Timed waits end with exactly one of: success, timeout, deletion.
//!
//! ## Memory Model
//!
//! - **No heap**: all kernel objects live in fixed-size tables
//! - **Generation-checked handles**: stale handles are rejected, not reused
//! - **Stacks**: caller-provided static regions or a fixed-block pool
//! - **Critical sections**: the `critical-section` crate, backed by
//!   `cortex-m` on target and by `std` on a host

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod kernel;
pub mod list;
pub mod mutex;
pub mod ready;
pub mod samples;
pub mod scheduler;
pub mod semaphore;
pub mod stack;
pub mod sync;
pub mod thread;
pub mod trace;

pub use clock::{ticks_from_millis, Tick, Timeout};
pub use config::KernelConfig;
pub use dispatch::{RunOutcome, ThreadContext};
pub use error::{KernelError, KernelResult};
pub use handle::{MutexId, SemaphoreId, ThreadId};
pub use mutex::MutexInfo;
pub use scheduler::{Scheduler, SchedulerStats, WaitOutcome};
pub use semaphore::SemaphoreInfo;
pub use stack::{Stack, StackPool};
pub use sync::CriticalGuard;
pub use thread::{Priority, Step, ThreadEntry, ThreadInfo, ThreadState};
pub use trace::{Trace, TraceEvent, WakeReason};
