//! # Mutex with Priority Inheritance
//!
//! A recursive, owner-tracked lock. While a thread waits on a mutex the
//! owner runs at least at the waiter's priority, and the boost follows the
//! chain of `blocked_on` links when the owner is itself waiting on another
//! mutex.
//!
//! Priorities are never restored from a saved value. Whenever a wait queue
//! changes, the affected owner's effective priority is recomputed as the
//! best of its base priority and the effective priorities of the waiters of
//! every mutex it still holds. This keeps nested and interleaved locks
//! correct without any bookkeeping beyond the queues themselves.

use log::{debug, trace, warn};

use crate::clock::Timeout;
use crate::config::{MAX_MUTEXES, MAX_THREADS, MUTEX_HOLD_MAX};
use crate::error::{KernelError, KernelResult};
use crate::handle::{MutexId, ThreadId};
use crate::list::{LinkKind, ThreadList};
use crate::scheduler::{Scheduler, WaitOutcome};
use crate::thread::{Priority, WaitTarget};
use crate::trace::WakeReason;

/// Mutex control block.
#[derive(Debug)]
pub(crate) struct MutexCb {
    pub(crate) active: bool,
    pub(crate) generation: u16,
    pub(crate) name: &'static str,
    /// Slot of the owning thread.
    pub(crate) owner: Option<usize>,
    pub(crate) hold_count: u16,
    /// Owner's base priority when it acquired the lock.
    pub(crate) original_priority: Priority,
    /// FIFO of blocked threads.
    pub(crate) wait_queue: ThreadList,
}

impl MutexCb {
    pub(crate) const fn empty() -> Self {
        Self {
            active: false,
            generation: 0,
            name: "",
            owner: None,
            hold_count: 0,
            original_priority: 0,
            wait_queue: ThreadList::new(LinkKind::Queue),
        }
    }

    fn release_slot(&mut self) {
        let generation = self.generation.wrapping_add(1);
        *self = Self::empty();
        self.generation = generation;
    }
}

/// Read-only view of a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexInfo {
    pub id: MutexId,
    pub name: &'static str,
    pub owner: Option<ThreadId>,
    pub hold_count: u16,
    pub waiters: usize,
    /// Owner's priority before any boost.
    pub original_priority: Option<Priority>,
}

impl Scheduler {
    pub fn mutex_create(&mut self, name: &'static str) -> KernelResult<MutexId> {
        let slot = self
            .mutexes
            .iter()
            .position(|mutex| !mutex.active)
            .ok_or(KernelError::Exhausted)?;
        let mutex = &mut self.mutexes[slot];
        mutex.active = true;
        mutex.name = name;
        let id = MutexId::new(slot, mutex.generation);
        debug!("created {} '{}'", id, name);
        Ok(id)
    }

    pub(crate) fn mutex_index(&self, id: MutexId) -> KernelResult<usize> {
        let index = id.index();
        match self.mutexes.get(index) {
            Some(mutex) if mutex.active && mutex.generation == id.generation() => Ok(index),
            _ => Err(KernelError::InvalidHandle),
        }
    }

    /// Acquire `id` for the Running thread.
    ///
    /// Returns `Completed` when the lock was free or already held by the
    /// caller, `Suspended` when the caller blocked. A blocked caller learns
    /// the outcome (`Ok`, `Timeout`) when it wakes.
    pub fn mutex_take(&mut self, id: MutexId, timeout: Timeout) -> KernelResult<WaitOutcome> {
        let m = self.mutex_index(id)?;
        let current = self.running_index()?;
        let mut guard = self.critical_section();
        let s = &mut *guard;

        match s.mutexes[m].owner {
            None => {
                let mutex = &mut s.mutexes[m];
                mutex.owner = Some(current);
                mutex.hold_count = 1;
                mutex.original_priority = s.threads[current].base_priority;
                trace!("'{}' acquired '{}'", s.threads[current].name, mutex.name);
                Ok(WaitOutcome::Completed)
            }
            Some(owner) if owner == current => {
                let mutex = &mut s.mutexes[m];
                if mutex.hold_count >= MUTEX_HOLD_MAX {
                    return Err(KernelError::Full);
                }
                mutex.hold_count += 1;
                Ok(WaitOutcome::Completed)
            }
            Some(owner) => {
                if timeout.is_no_wait() {
                    return Err(KernelError::Timeout);
                }
                s.block_current(WaitTarget::Mutex(id), timeout)?;
                debug!(
                    "'{}' blocks on '{}' held by '{}'",
                    s.threads[current].name, s.mutexes[m].name, s.threads[owner].name
                );
                s.propagate_priority(owner);
                Ok(WaitOutcome::Suspended)
            }
        }
    }

    /// Release one hold on `id`. At the last hold ownership passes to the
    /// head waiter and the caller's priority is recomputed.
    pub fn mutex_release(&mut self, id: MutexId) -> KernelResult<()> {
        let m = self.mutex_index(id)?;
        let current = self.running_index()?;
        let mut guard = self.critical_section();
        let s = &mut *guard;

        match s.mutexes[m].owner {
            None => return Err(KernelError::InvalidState),
            Some(owner) if owner != current => return Err(KernelError::NotOwner),
            Some(_) => {}
        }
        s.mutexes[m].hold_count -= 1;
        if s.mutexes[m].hold_count > 0 {
            return Ok(());
        }
        trace!("'{}' released '{}'", s.threads[current].name, s.mutexes[m].name);
        s.hand_off_mutex(m);
        s.propagate_priority(current);
        Ok(())
    }

    /// Delete an unlocked mutex with no waiters.
    pub fn mutex_delete(&mut self, id: MutexId) -> KernelResult<()> {
        let m = self.mutex_index(id)?;
        let mutex = &mut self.mutexes[m];
        if mutex.owner.is_some() || !mutex.wait_queue.is_empty() {
            return Err(KernelError::InvalidState);
        }
        debug!("deleted {} '{}'", id, mutex.name);
        mutex.release_slot();
        Ok(())
    }

    pub fn mutex_info(&self, id: MutexId) -> KernelResult<MutexInfo> {
        let m = self.mutex_index(id)?;
        let mutex = &self.mutexes[m];
        Ok(MutexInfo {
            id,
            name: mutex.name,
            owner: mutex.owner.map(|index| self.thread_id(index)),
            hold_count: mutex.hold_count,
            waiters: mutex.wait_queue.len(),
            original_priority: mutex.owner.map(|_| mutex.original_priority),
        })
    }

    /// Threads blocked on `id`, in hand-off order.
    pub fn mutex_waiters(&self, id: MutexId) -> KernelResult<impl Iterator<Item = ThreadId> + '_> {
        let m = self.mutex_index(id)?;
        Ok(self.mutexes[m]
            .wait_queue
            .iter(&self.threads)
            .map(|index| self.thread_id(index)))
    }

    pub fn mutex_find(&self, name: &str) -> Option<MutexId> {
        self.mutexes
            .iter()
            .position(|mutex| mutex.active && mutex.name == name)
            .map(|index| MutexId::new(index, self.mutexes[index].generation))
    }

    // -----------------------------------------------------------------------
    // Inheritance engine
    // -----------------------------------------------------------------------

    /// Best of the base priority and the waiters of every mutex held.
    pub(crate) fn inherited_priority(&self, index: usize) -> Priority {
        self.mutexes
            .iter()
            .filter(|mutex| mutex.active && mutex.owner == Some(index))
            .flat_map(|mutex| mutex.wait_queue.iter(&self.threads))
            .map(|waiter| self.threads[waiter].effective_priority)
            .fold(self.threads[index].base_priority, Priority::min)
    }

    /// Recompute `start`'s priority and carry any change along the chain of
    /// owners it is blocked behind.
    pub(crate) fn propagate_priority(&mut self, start: usize) {
        let mut visited: u32 = 0;
        let mut cursor = Some(start);
        while let Some(index) = cursor {
            debug_assert!(index < MAX_THREADS);
            let bit = 1u32 << index;
            if visited & bit != 0 {
                warn!(
                    "inheritance cycle through '{}'; stopping propagation",
                    self.threads[index].name
                );
                break;
            }
            visited |= bit;

            let target = self.inherited_priority(index);
            if !self.set_effective_priority(index, target) {
                break;
            }
            cursor = match self.threads[index].blocked_on {
                Some(WaitTarget::Mutex(id)) => self.mutexes[id.index()].owner,
                _ => None,
            };
        }
        self.schedule();
    }

    /// Clear ownership of `m` and give it to the head waiter, if any.
    fn hand_off_mutex(&mut self, m: usize) {
        let next = self.mutexes[m].wait_queue.pop_front(&mut self.threads);
        let mutex = &mut self.mutexes[m];
        mutex.owner = next;
        mutex.hold_count = 0;
        if let Some(next) = next {
            mutex.hold_count = 1;
            mutex.original_priority = self.threads[next].base_priority;
            self.wake(next, Ok(()), WakeReason::Acquired);
            self.propagate_priority(next);
        }
        self.schedule();
    }

    /// Release every mutex owned by a terminating thread.
    pub(crate) fn release_held_mutexes(&mut self, index: usize) {
        for m in 0..MAX_MUTEXES {
            let mutex = &self.mutexes[m];
            if mutex.active && mutex.owner == Some(index) {
                warn!(
                    "'{}' terminated holding '{}'; releasing",
                    self.threads[index].name, mutex.name
                );
                self.hand_off_mutex(m);
            }
        }
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
    use crate::thread::{Step, ThreadState};

    fn busy(_: &mut ThreadContext<'_>) -> Step {
        Step::Busy
    }

    fn spawn(s: &mut Scheduler, name: &'static str, prio: Priority) -> ThreadId {
        let id = s.thread_init(name, busy, 0, test_stack(), prio, 5).unwrap();
        s.thread_start(id).unwrap();
        id
    }

    fn prio(s: &Scheduler, id: ThreadId) -> Priority {
        s.thread_info(id).unwrap().effective_priority
    }

    fn state(s: &Scheduler, id: ThreadId) -> ThreadState {
        s.thread_info(id).unwrap().state
    }

    #[test]
    fn test_basic_inheritance() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        let low = spawn(&mut s, "low", 20);
        s.start();
        assert_eq!(s.mutex_take(m, Timeout::Forever), Ok(WaitOutcome::Completed));

        let high = spawn(&mut s, "high", 5);
        assert_eq!(s.current_thread(), Some(high));
        assert_eq!(s.mutex_take(m, Timeout::Forever), Ok(WaitOutcome::Suspended));
        assert_eq!(state(&s, high), ThreadState::Blocked);
        assert_eq!(s.current_thread(), Some(low));
        assert_eq!(prio(&s, low), 5);

        s.mutex_release(m).unwrap();
        assert_eq!(prio(&s, low), 20);
        assert_eq!(s.current_thread(), Some(high));
        assert_eq!(s.mutex_info(m).unwrap().owner, Some(high));
    }

    #[test]
    fn test_transitive_inheritance() {
        let mut s = Scheduler::default();
        let m1 = s.mutex_create("m1").unwrap();
        let m2 = s.mutex_create("m2").unwrap();

        let l2 = spawn(&mut s, "l2", 25);
        s.start();
        s.mutex_take(m2, Timeout::Forever).unwrap();

        let l1 = spawn(&mut s, "l1", 15);
        s.mutex_take(m1, Timeout::Forever).unwrap();
        assert_eq!(s.mutex_take(m2, Timeout::Forever), Ok(WaitOutcome::Suspended));
        assert_eq!(prio(&s, l2), 15);

        let h = spawn(&mut s, "h", 5);
        assert_eq!(s.mutex_take(m1, Timeout::Forever), Ok(WaitOutcome::Suspended));
        assert_eq!(prio(&s, l1), 5);
        assert_eq!(prio(&s, l2), 5);
        assert_eq!(s.current_thread(), Some(l2));

        s.mutex_release(m2).unwrap();
        assert_eq!(prio(&s, l2), 25);
        assert_eq!(s.current_thread(), Some(l1));
        assert_eq!(prio(&s, l1), 5);

        s.mutex_release(m2).unwrap();
        assert_eq!(prio(&s, l1), 5);
        s.mutex_release(m1).unwrap();
        assert_eq!(prio(&s, l1), 15);
        assert_eq!(s.current_thread(), Some(h));
    }

    #[test]
    fn test_timeout_removes_boost() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        let low = spawn(&mut s, "low", 20);
        s.start();
        s.mutex_take(m, Timeout::Forever).unwrap();

        let high = spawn(&mut s, "high", 5);
        s.mutex_take(m, Timeout::Ticks(10)).unwrap();
        assert_eq!(prio(&s, low), 5);

        for _ in 0..9 {
            s.tick();
        }
        assert_eq!(state(&s, high), ThreadState::Blocked);
        s.tick();
        assert_eq!(s.current_thread(), Some(high));
        assert_eq!(prio(&s, low), 20);
        assert_eq!(
            s.threads[high.index()].wait_result,
            Some(Err(KernelError::Timeout))
        );
        assert_eq!(s.mutex_info(m).unwrap().owner, Some(low));
        assert_eq!(s.stats().timeouts, 1);
    }

    #[test]
    fn test_unboosted_preempted_owner_keeps_its_place() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        let low = spawn(&mut s, "low", 20);
        s.start();
        s.mutex_take(m, Timeout::Forever).unwrap();
        let peer = spawn(&mut s, "peer", 20);

        let high = spawn(&mut s, "high", 5);
        s.mutex_take(m, Timeout::Forever).unwrap();
        assert_eq!(s.current_thread(), Some(low));
        assert_eq!(prio(&s, low), 5);

        // Preempted while boosted, then the boost goes away.
        let urgent = spawn(&mut s, "urgent", 2);
        assert_eq!(s.current_thread(), Some(urgent));
        s.thread_delete(high).unwrap();
        assert_eq!(prio(&s, low), 20);

        s.thread_delete(urgent).unwrap();
        assert_eq!(s.current_thread(), Some(low));
        assert_eq!(state(&s, peer), ThreadState::Ready);
    }

    #[test]
    fn test_deleting_waiter_removes_boost() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        let low = spawn(&mut s, "low", 20);
        s.start();
        s.mutex_take(m, Timeout::Forever).unwrap();
        let high = spawn(&mut s, "high", 5);
        s.mutex_take(m, Timeout::Forever).unwrap();
        assert_eq!(prio(&s, low), 5);

        s.thread_delete(high).unwrap();
        assert_eq!(prio(&s, low), 20);
        assert_eq!(s.mutex_info(m).unwrap().waiters, 0);
    }

    #[test]
    fn test_owner_exit_hands_off() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        let _low = spawn(&mut s, "low", 20);
        s.start();
        s.mutex_take(m, Timeout::Forever).unwrap();
        let high = spawn(&mut s, "high", 5);
        s.mutex_take(m, Timeout::Forever).unwrap();

        s.thread_exit().unwrap();
        assert_eq!(s.current_thread(), Some(high));
        let info = s.mutex_info(m).unwrap();
        assert_eq!(info.owner, Some(high));
        assert_eq!(info.hold_count, 1);
        assert_eq!(s.threads[high.index()].wait_result, Some(Ok(())));
    }

    #[test]
    fn test_recursive_hold() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        spawn(&mut s, "a", 10);
        s.start();
        s.mutex_take(m, Timeout::Forever).unwrap();
        s.mutex_take(m, Timeout::NoWait).unwrap();
        assert_eq!(s.mutex_info(m).unwrap().hold_count, 2);

        s.mutex_release(m).unwrap();
        assert!(s.mutex_info(m).unwrap().owner.is_some());
        s.mutex_release(m).unwrap();
        assert_eq!(s.mutex_info(m).unwrap().owner, None);
        assert_eq!(s.mutex_release(m), Err(KernelError::InvalidState));
    }

    #[test]
    fn test_recursion_limit() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        spawn(&mut s, "a", 10);
        s.start();
        s.mutex_take(m, Timeout::Forever).unwrap();
        s.mutexes[m.index()].hold_count = MUTEX_HOLD_MAX - 1;

        assert_eq!(s.mutex_take(m, Timeout::NoWait), Ok(WaitOutcome::Completed));
        assert_eq!(s.mutex_take(m, Timeout::NoWait), Err(KernelError::Full));
        assert_eq!(s.mutex_info(m).unwrap().hold_count, MUTEX_HOLD_MAX);
    }

    #[test]
    fn test_release_by_non_owner() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        spawn(&mut s, "low", 20);
        s.start();
        s.mutex_take(m, Timeout::Forever).unwrap();
        spawn(&mut s, "high", 5);
        assert_eq!(s.mutex_release(m), Err(KernelError::NotOwner));
        assert_eq!(s.mutex_take(m, Timeout::NoWait), Err(KernelError::Timeout));
    }

    #[test]
    fn test_fifo_hand_off_order() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        spawn(&mut s, "owner", 20);
        s.start();
        s.mutex_take(m, Timeout::Forever).unwrap();

        let a = spawn(&mut s, "a", 10);
        s.mutex_take(m, Timeout::Forever).unwrap();
        let b = spawn(&mut s, "b", 8);
        s.mutex_take(m, Timeout::Forever).unwrap();
        assert_eq!(s.mutex_waiters(m).unwrap().collect::<Vec<_>>(), [a, b]);

        s.mutex_release(m).unwrap();
        assert_eq!(s.mutex_info(m).unwrap().owner, Some(a));
        // `b` still waits, so the new owner inherits its priority.
        assert_eq!(prio(&s, a), 8);
    }

    #[test]
    fn test_block_inside_critical_section_rejected() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        spawn(&mut s, "low", 20);
        s.start();
        s.mutex_take(m, Timeout::Forever).unwrap();
        spawn(&mut s, "high", 5);

        s.enter_critical();
        assert_eq!(
            s.mutex_take(m, Timeout::Forever),
            Err(KernelError::InvalidState)
        );
        s.exit_critical().unwrap();
        assert_eq!(s.mutex_info(m).unwrap().waiters, 0);
    }

    #[test]
    fn test_delete_rules() {
        let mut s = Scheduler::default();
        let m = s.mutex_create("m").unwrap();
        spawn(&mut s, "a", 10);
        s.start();
        s.mutex_take(m, Timeout::Forever).unwrap();
        assert_eq!(s.mutex_delete(m), Err(KernelError::InvalidState));
        s.mutex_release(m).unwrap();
        s.mutex_delete(m).unwrap();
        assert_eq!(s.mutex_info(m), Err(KernelError::InvalidHandle));
        assert_eq!(s.mutex_find("m"), None);
    }
}
