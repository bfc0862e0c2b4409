//! # Ready Structure
//!
//! One FIFO bucket per priority level plus a bitmap of non-empty buckets.
//! The highest ready priority is the lowest set bit, so selection is O(1).
//! Order inside a bucket is arrival/rotation order, which is what gives
//! round robin among equal priorities.

use crate::config::MAX_PRIORITIES;
use crate::list::{LinkKind, ThreadList};
use crate::thread::{Priority, Thread};

#[derive(Debug)]
pub struct ReadyQueue {
    buckets: [ThreadList; MAX_PRIORITIES],
    bitmap: u32,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            buckets: [ThreadList::new(LinkKind::Queue); MAX_PRIORITIES],
            bitmap: 0,
        }
    }

    #[inline]
    fn bucket_of(threads: &[Thread], index: usize) -> usize {
        threads[index].effective_priority as usize
    }

    /// Append at the back of the thread's bucket (arrival, rotation).
    pub fn push_back(&mut self, threads: &mut [Thread], index: usize) {
        let prio = Self::bucket_of(threads, index);
        self.buckets[prio].push_back(threads, index);
        self.bitmap |= 1 << prio;
    }

    /// Insert at the front of the thread's bucket (preempted thread keeps
    /// its place).
    pub fn push_front(&mut self, threads: &mut [Thread], index: usize) {
        let prio = Self::bucket_of(threads, index);
        self.buckets[prio].push_front(threads, index);
        self.bitmap |= 1 << prio;
    }

    /// Remove a thread. Must be called before its effective priority
    /// changes.
    pub fn remove(&mut self, threads: &mut [Thread], index: usize) -> bool {
        let prio = Self::bucket_of(threads, index);
        let removed = self.buckets[prio].remove(threads, index);
        if self.buckets[prio].is_empty() {
            self.bitmap &= !(1 << prio);
        }
        removed
    }

    /// Highest ready priority, if any thread is ready.
    #[inline]
    pub fn highest_priority(&self) -> Option<Priority> {
        if self.bitmap == 0 {
            None
        } else {
            Some(self.bitmap.trailing_zeros() as Priority)
        }
    }

    /// Head of the highest non-empty bucket.
    pub fn peek(&self) -> Option<usize> {
        let prio = self.highest_priority()?;
        self.buckets[prio as usize].front()
    }

    /// Number of ready threads at `prio`.
    pub fn len_at(&self, prio: Priority) -> usize {
        self.buckets
            .get(prio as usize)
            .map_or(0, |bucket| bucket.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(ThreadList::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    /// Iterate the bucket for `prio` in scheduling order.
    pub fn iter_at<'a>(
        &self,
        threads: &'a [Thread],
        prio: Priority,
    ) -> impl Iterator<Item = usize> + 'a {
        self.buckets[prio as usize].iter(threads)
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
