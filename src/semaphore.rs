//! # Counting Semaphore
//!
//! A count plus a FIFO of blocked takers. A release with waiters hands the
//! unit straight to the head waiter and leaves the count untouched, so a
//! woken taker can never lose its unit to a thread that was not waiting.

use log::{debug, trace};

use crate::clock::Timeout;
use crate::config::SEMAPHORE_MAX;
use crate::error::{KernelError, KernelResult};
use crate::handle::{SemaphoreId, ThreadId};
use crate::list::{LinkKind, ThreadList};
use crate::scheduler::{Scheduler, WaitOutcome};
use crate::thread::WaitTarget;
use crate::trace::WakeReason;

/// Semaphore control block.
#[derive(Debug)]
pub(crate) struct SemaphoreCb {
    pub(crate) active: bool,
    pub(crate) generation: u16,
    pub(crate) name: &'static str,
    pub(crate) count: u32,
    pub(crate) wait_queue: ThreadList,
}

impl SemaphoreCb {
    pub(crate) const fn empty() -> Self {
        Self {
            active: false,
            generation: 0,
            name: "",
            count: 0,
            wait_queue: ThreadList::new(LinkKind::Queue),
        }
    }
}

/// Read-only view of a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreInfo {
    pub id: SemaphoreId,
    pub name: &'static str,
    pub count: u32,
    pub waiters: usize,
}

impl Scheduler {
    pub fn semaphore_create(&mut self, name: &'static str, initial: u32) -> KernelResult<SemaphoreId> {
        if initial > SEMAPHORE_MAX {
            return Err(KernelError::InvalidArgument);
        }
        let slot = self
            .semaphores
            .iter()
            .position(|sem| !sem.active)
            .ok_or(KernelError::Exhausted)?;
        let sem = &mut self.semaphores[slot];
        sem.active = true;
        sem.name = name;
        sem.count = initial;
        let id = SemaphoreId::new(slot, sem.generation);
        debug!("created {} '{}' count {}", id, name, initial);
        Ok(id)
    }

    pub(crate) fn semaphore_index(&self, id: SemaphoreId) -> KernelResult<usize> {
        let index = id.index();
        match self.semaphores.get(index) {
            Some(sem) if sem.active && sem.generation == id.generation() => Ok(index),
            _ => Err(KernelError::InvalidHandle),
        }
    }

    /// Take one unit for the Running thread, blocking up to `timeout`.
    /// A blocked caller learns the outcome (`Ok`, `Timeout`,
    /// `ResourceDeleted`) when it wakes.
    pub fn semaphore_take(&mut self, id: SemaphoreId, timeout: Timeout) -> KernelResult<WaitOutcome> {
        let index = self.semaphore_index(id)?;
        let current = self.running_index()?;
        let mut guard = self.critical_section();
        let s = &mut *guard;

        if s.semaphores[index].count > 0 {
            s.semaphores[index].count -= 1;
            return Ok(WaitOutcome::Completed);
        }
        if timeout.is_no_wait() {
            return Err(KernelError::Timeout);
        }
        s.block_current(WaitTarget::Semaphore(id), timeout)?;
        trace!(
            "'{}' waits on '{}' ({:?})",
            s.threads[current].name,
            s.semaphores[index].name,
            timeout
        );
        Ok(WaitOutcome::Suspended)
    }

    /// Release one unit. Needs no Running thread, so the tick path may call
    /// it.
    pub fn semaphore_release(&mut self, id: SemaphoreId) -> KernelResult<()> {
        let index = self.semaphore_index(id)?;
        let mut guard = self.critical_section();
        let s = &mut *guard;

        match s.semaphores[index].wait_queue.pop_front(&mut s.threads) {
            Some(waiter) => {
                s.wake(waiter, Ok(()), WakeReason::Acquired);
                s.schedule();
            }
            None => {
                let sem = &mut s.semaphores[index];
                if sem.count >= SEMAPHORE_MAX {
                    return Err(KernelError::Full);
                }
                sem.count += 1;
            }
        }
        Ok(())
    }

    /// Delete the semaphore. Every waiter wakes with `ResourceDeleted`.
    pub fn semaphore_delete(&mut self, id: SemaphoreId) -> KernelResult<()> {
        let index = self.semaphore_index(id)?;
        let mut guard = self.critical_section();
        let s = &mut *guard;

        let mut woken = 0;
        while let Some(waiter) = s.semaphores[index].wait_queue.pop_front(&mut s.threads) {
            s.wake(waiter, Err(KernelError::ResourceDeleted), WakeReason::Deleted);
            woken += 1;
        }
        let sem = &mut s.semaphores[index];
        debug!("deleted {} '{}', woke {} waiter(s)", id, sem.name, woken);
        let generation = sem.generation.wrapping_add(1);
        *sem = SemaphoreCb::empty();
        sem.generation = generation;
        s.schedule();
        Ok(())
    }

    pub fn semaphore_info(&self, id: SemaphoreId) -> KernelResult<SemaphoreInfo> {
        let index = self.semaphore_index(id)?;
        let sem = &self.semaphores[index];
        Ok(SemaphoreInfo {
            id,
            name: sem.name,
            count: sem.count,
            waiters: sem.wait_queue.len(),
        })
    }

    /// Threads blocked on `id`, in wake order.
    pub fn semaphore_waiters(
        &self,
        id: SemaphoreId,
    ) -> KernelResult<impl Iterator<Item = ThreadId> + '_> {
        let index = self.semaphore_index(id)?;
        Ok(self.semaphores[index]
            .wait_queue
            .iter(&self.threads)
            .map(|waiter| self.thread_id(waiter)))
    }

    pub fn semaphore_find(&self, name: &str) -> Option<SemaphoreId> {
        self.semaphores
            .iter()
            .position(|sem| sem.active && sem.name == name)
            .map(|index| SemaphoreId::new(index, self.semaphores[index].generation))
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
    use crate::thread::{Priority, Step, ThreadState};

    fn busy(_: &mut ThreadContext<'_>) -> Step {
        Step::Busy
    }

    fn spawn(s: &mut Scheduler, name: &'static str, prio: Priority) -> ThreadId {
        let id = s.thread_init(name, busy, 0, test_stack(), prio, 5).unwrap();
        s.thread_start(id).unwrap();
        id
    }

    #[test]
    fn test_take_decrements() {
        let mut s = Scheduler::default();
        let sem = s.semaphore_create("sem", 2).unwrap();
        spawn(&mut s, "a", 10);
        s.start();
        assert_eq!(s.semaphore_take(sem, Timeout::NoWait), Ok(WaitOutcome::Completed));
        assert_eq!(s.semaphore_take(sem, Timeout::NoWait), Ok(WaitOutcome::Completed));
        assert_eq!(s.semaphore_take(sem, Timeout::NoWait), Err(KernelError::Timeout));
        assert_eq!(s.semaphore_info(sem).unwrap().count, 0);
    }

    #[test]
    fn test_release_hands_off_without_counting() {
        let mut s = Scheduler::default();
        let sem = s.semaphore_create("sem", 0).unwrap();
        let low = spawn(&mut s, "low", 20);
        let high = spawn(&mut s, "high", 5);
        s.start();
        assert_eq!(s.semaphore_take(sem, Timeout::Forever), Ok(WaitOutcome::Suspended));
        assert_eq!(s.current_thread(), Some(low));

        s.semaphore_release(sem).unwrap();
        assert_eq!(s.current_thread(), Some(high));
        assert_eq!(s.semaphore_info(sem).unwrap().count, 0);
        assert_eq!(s.threads[high.index()].wait_result, Some(Ok(())));

        s.semaphore_release(sem).unwrap();
        assert_eq!(s.semaphore_info(sem).unwrap().count, 1);
    }

    #[test]
    fn test_timeout_after_exact_ticks() {
        let mut s = Scheduler::default();
        let sem = s.semaphore_create("sem", 0).unwrap();
        let waiter = spawn(&mut s, "waiter", 5);
        spawn(&mut s, "idle", 30);
        s.start();
        s.semaphore_take(sem, Timeout::Ticks(60)).unwrap();

        for _ in 0..59 {
            s.tick();
        }
        assert_eq!(s.thread_info(waiter).unwrap().state, ThreadState::Blocked);
        s.tick();
        assert_eq!(s.current_thread(), Some(waiter));
        assert_eq!(
            s.threads[waiter.index()].wait_result,
            Some(Err(KernelError::Timeout))
        );
        assert_eq!(s.semaphore_info(sem).unwrap().waiters, 0);
        assert_eq!(s.semaphore_info(sem).unwrap().count, 0);
    }

    #[test]
    fn test_delete_wakes_all_waiters() {
        let mut s = Scheduler::default();
        let sem = s.semaphore_create("sem", 0).unwrap();
        let a = spawn(&mut s, "a", 5);
        let b = spawn(&mut s, "b", 6);
        spawn(&mut s, "idle", 30);
        s.start();
        s.semaphore_take(sem, Timeout::Forever).unwrap();
        s.semaphore_take(sem, Timeout::Ticks(100)).unwrap();
        assert_eq!(s.semaphore_waiters(sem).unwrap().collect::<Vec<_>>(), [a, b]);

        s.semaphore_delete(sem).unwrap();
        for id in [a, b] {
            assert_eq!(
                s.threads[id.index()].wait_result,
                Some(Err(KernelError::ResourceDeleted))
            );
            assert_eq!(s.thread_info(id).unwrap().wake_tick, None);
        }
        assert_eq!(s.current_thread(), Some(a));
        assert_eq!(s.semaphore_info(sem), Err(KernelError::InvalidHandle));
        assert_eq!(s.semaphore_release(sem), Err(KernelError::InvalidHandle));
    }

    #[test]
    fn test_count_is_capped() {
        let mut s = Scheduler::default();
        let sem = s.semaphore_create("sem", SEMAPHORE_MAX).unwrap();
        assert_eq!(s.semaphore_release(sem), Err(KernelError::Full));
        assert_eq!(
            s.semaphore_create("big", SEMAPHORE_MAX + 1),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn test_release_without_running_thread() {
        let mut s = Scheduler::default();
        let sem = s.semaphore_create("sem", 0).unwrap();
        s.semaphore_release(sem).unwrap();
        assert_eq!(s.semaphore_find("sem"), Some(sem));
        assert_eq!(s.semaphore_info(sem).unwrap().count, 1);
    }
}
