//! Intrusive thread lists.
//!
//! Ready buckets, wait queues and the timer list are doubly linked lists
//! threaded through the TCBs themselves, keyed by slot index. A TCB carries
//! two links: the queue link (a ready bucket or a wait queue, never both)
//! and the timer link. Every operation is O(1) except sorted insertion.

use crate::thread::Thread;

/// Per-TCB link for one list kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
}

impl Link {
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
        }
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Which of the two TCB links a list threads through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Queue,
    Timer,
}

/// A FIFO-ordered list of threads.
#[derive(Debug, Clone, Copy)]
pub struct ThreadList {
    kind: LinkKind,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl ThreadList {
    pub const fn new(kind: LinkKind) -> Self {
        Self {
            kind,
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    fn link<'a>(&self, threads: &'a [Thread], index: usize) -> &'a Link {
        match self.kind {
            LinkKind::Queue => &threads[index].queue_link,
            LinkKind::Timer => &threads[index].timer_link,
        }
    }

    #[inline]
    fn link_mut<'a>(&self, threads: &'a mut [Thread], index: usize) -> &'a mut Link {
        match self.kind {
            LinkKind::Queue => &mut threads[index].queue_link,
            LinkKind::Timer => &mut threads[index].timer_link,
        }
    }

    #[inline]
    pub fn front(&self) -> Option<usize> {
        self.head
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append at the tail.
    pub fn push_back(&mut self, threads: &mut [Thread], index: usize) {
        debug_assert!(!self.link(threads, index).linked);
        let tail = self.tail;
        *self.link_mut(threads, index) = Link {
            prev: tail,
            next: None,
            linked: true,
        };
        match tail {
            Some(tail) => self.link_mut(threads, tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
    }

    /// Insert at the head.
    pub fn push_front(&mut self, threads: &mut [Thread], index: usize) {
        match self.head {
            Some(head) => self.insert_before(threads, index, head),
            None => self.push_back(threads, index),
        }
    }

    /// Insert `index` immediately before the member `before`.
    fn insert_before(&mut self, threads: &mut [Thread], index: usize, before: usize) {
        debug_assert!(!self.link(threads, index).linked);
        let prev = self.link(threads, before).prev;
        *self.link_mut(threads, index) = Link {
            prev,
            next: Some(before),
            linked: true,
        };
        self.link_mut(threads, before).prev = Some(index);
        match prev {
            Some(prev) => self.link_mut(threads, prev).next = Some(index),
            None => self.head = Some(index),
        }
        self.len += 1;
    }

    /// Insert keeping the list ordered by `key`; equal keys keep arrival
    /// order.
    pub fn insert_sorted<K, F>(&mut self, threads: &mut [Thread], index: usize, key: F)
    where
        K: Ord,
        F: Fn(&Thread) -> K,
    {
        let new_key = key(&threads[index]);
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if key(&threads[current]) > new_key {
                self.insert_before(threads, index, current);
                return;
            }
            cursor = self.link(threads, current).next;
        }
        self.push_back(threads, index);
    }

    /// Unlink a member. Returns `false` if the thread is not linked
    /// through this list's link kind.
    pub fn remove(&mut self, threads: &mut [Thread], index: usize) -> bool {
        let link = *self.link(threads, index);
        if !link.linked {
            return false;
        }
        match link.prev {
            Some(prev) => self.link_mut(threads, prev).next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => self.link_mut(threads, next).prev = link.prev,
            None => self.tail = link.prev,
        }
        *self.link_mut(threads, index) = Link::new();
        self.len -= 1;
        true
    }

    pub fn pop_front(&mut self, threads: &mut [Thread]) -> Option<usize> {
        let head = self.head?;
        self.remove(threads, head);
        Some(head)
    }

    /// Iterate members from head to tail.
    pub fn iter<'a>(&self, threads: &'a [Thread]) -> Iter<'a> {
        Iter {
            threads,
            kind: self.kind,
            cursor: self.head,
        }
    }
}

/// Iterator over the slot indices of a [`ThreadList`].
pub struct Iter<'a> {
    threads: &'a [Thread],
    kind: LinkKind,
    cursor: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.cursor?;
        let link = match self.kind {
            LinkKind::Queue => &self.threads[current].queue_link,
            LinkKind::Timer => &self.threads[current].timer_link,
        };
        self.cursor = link.next;
        Some(current)
    }
}
