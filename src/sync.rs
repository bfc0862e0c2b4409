//! # Synchronization Primitives
//!
//! Two layers of mutual exclusion:
//!
//! - [`critical_section`] masks interrupts (via the `critical-section`
//!   crate) so the global scheduler instance can be shared with the SysTick
//!   handler.
//! - [`CriticalGuard`] is the scheduler-level critical section: it defers
//!   preemption and tick-driven rotation while held. Nesting is counted and
//!   the guard is released on every exit path, so a multi-step transition
//!   (block + enqueue + boost) is seen by other threads as one step.
//!
//! Threads that must keep the CPU across several steps use the paired
//! `enter_critical`/`exit_critical` form instead, which is counted
//! separately so the kernel can refuse to block a thread that holds it.

use core::ops::{Deref, DerefMut};

use crate::error::{KernelError, KernelResult};
use crate::scheduler::Scheduler;

/// Execute a closure with interrupts masked.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(critical_section::CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// Preemption-deferral bookkeeping owned by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PreemptLock {
    /// Total nesting: guards plus the user-held count.
    depth: u32,
    /// Nesting taken through `enter_critical`.
    user: u32,
    /// A reschedule was requested while locked.
    pending: bool,
}

impl PreemptLock {
    pub(crate) const fn new() -> Self {
        Self {
            depth: 0,
            user: 0,
            pending: false,
        }
    }

    #[inline]
    pub(crate) fn is_locked(&self) -> bool {
        self.depth > 0
    }

    #[inline]
    pub(crate) fn user_nesting(&self) -> u32 {
        self.user
    }

    #[inline]
    pub(crate) fn defer(&mut self) {
        self.pending = true;
    }

    #[inline]
    pub(crate) fn acquire(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn acquire_user(&mut self) {
        self.depth += 1;
        self.user += 1;
    }

    /// Drop one level. Returns `true` when the last level is gone and a
    /// reschedule was deferred; the pending flag is consumed.
    pub(crate) fn release(&mut self) -> bool {
        debug_assert!(self.depth > 0);
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 && self.pending {
            self.pending = false;
            true
        } else {
            false
        }
    }

    pub(crate) fn release_user(&mut self) -> KernelResult<bool> {
        if self.user == 0 {
            return Err(KernelError::InvalidState);
        }
        self.user -= 1;
        Ok(self.release())
    }

    /// Forget all user nesting, e.g. when its holder terminates. Returns
    /// the number of levels dropped.
    pub(crate) fn clear_user(&mut self) -> u32 {
        let dropped = self.user;
        self.depth -= dropped;
        self.user = 0;
        dropped
    }
}

/// RAII scheduler lock. Dereferences to the scheduler it locks.
pub struct CriticalGuard<'a> {
    sched: &'a mut Scheduler,
}

impl Scheduler {
    /// Defer preemption until the returned guard is dropped.
    pub fn critical_section(&mut self) -> CriticalGuard<'_> {
        self.preempt.acquire();
        CriticalGuard { sched: self }
    }

    /// Enter the paired critical section. Unlike the guard this may be held
    /// across thread steps; the holder may not block until it exits.
    pub fn enter_critical(&mut self) {
        self.preempt.acquire_user();
    }

    /// Leave the paired critical section, running any deferred rotation or
    /// reschedule once the last level is released.
    pub fn exit_critical(&mut self) -> KernelResult<()> {
        if self.preempt.release_user()? {
            self.resume_preemption();
        }
        Ok(())
    }

    /// Current nesting of the paired critical section.
    pub fn critical_nesting(&self) -> u32 {
        self.preempt.user_nesting()
    }
}

impl Deref for CriticalGuard<'_> {
    type Target = Scheduler;

    fn deref(&self) -> &Scheduler {
        self.sched
    }
}

impl DerefMut for CriticalGuard<'_> {
    fn deref_mut(&mut self) -> &mut Scheduler {
        self.sched
    }
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        if self.sched.preempt.release() {
            self.sched.resume_preemption();
        }
    }
}
