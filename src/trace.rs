//! # Scheduler Trace
//!
//! A fixed-capacity ring of scheduling events, kept for diagnostics and
//! for tests that assert on the order of kernel decisions. When full, the
//! oldest event is overwritten.

use crate::clock::Tick;
use crate::config::TRACE_CAPACITY;
use crate::handle::ThreadId;
use crate::thread::Priority;

/// Why a thread left the Blocked or Sleeping state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The awaited mutex or semaphore was handed to the thread.
    Acquired,
    /// The timeout expired (or the sleep finished).
    Timeout,
    /// The awaited resource was deleted.
    Deleted,
}

/// A recorded scheduling event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// `to` became the Running thread.
    Switch {
        tick: Tick,
        from: Option<ThreadId>,
        to: ThreadId,
    },
    /// `thread` lost the CPU to a higher-priority thread.
    Preempted { tick: Tick, thread: ThreadId },
    /// Effective priority changed through inheritance or its removal.
    PriorityChanged {
        tick: Tick,
        thread: ThreadId,
        from: Priority,
        to: Priority,
    },
    /// A blocked or sleeping thread became ready.
    Woken {
        tick: Tick,
        thread: ThreadId,
        reason: WakeReason,
    },
    /// A thread terminated.
    Exited { tick: Tick, thread: ThreadId },
    /// Observation recorded by a thread through `ThreadContext::mark`.
    Mark {
        tick: Tick,
        thread: ThreadId,
        tag: &'static str,
        value: i64,
    },
}

#[derive(Debug)]
pub struct Trace {
    events: [Option<TraceEvent>; TRACE_CAPACITY],
    next: usize,
    len: usize,
    dropped: u64,
}

impl Trace {
    pub const fn new() -> Self {
        Self {
            events: [None; TRACE_CAPACITY],
            next: 0,
            len: 0,
            dropped: 0,
        }
    }

    pub fn record(&mut self, event: TraceEvent) {
        if self.len == TRACE_CAPACITY {
            self.dropped += 1;
        } else {
            self.len += 1;
        }
        self.events[self.next] = Some(event);
        self.next = (self.next + 1) % TRACE_CAPACITY;
    }

    /// Number of events overwritten since the last clear.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Events from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &TraceEvent> + '_ {
        let start = (self.next + TRACE_CAPACITY - self.len) % TRACE_CAPACITY;
        (0..self.len).filter_map(move |i| self.events[(start + i) % TRACE_CAPACITY].as_ref())
    }

    /// Marks with the given tag, oldest first, as `(tick, thread, value)`.
    pub fn marks<'a>(
        &'a self,
        tag: &'a str,
    ) -> impl Iterator<Item = (Tick, ThreadId, i64)> + 'a {
        self.iter().filter_map(move |event| match *event {
            TraceEvent::Mark {
                tick,
                thread,
                tag: t,
                value,
            } if t == tag => Some((tick, thread, value)),
            _ => None,
        })
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(tick: Tick, value: i64) -> TraceEvent {
        TraceEvent::Mark {
            tick,
            thread: ThreadId::new(0, 0),
            tag: "t",
            value,
        }
    }

    #[test]
    fn test_ring_keeps_newest() {
        let mut trace = Trace::new();
        for i in 0..(TRACE_CAPACITY as i64 + 3) {
            trace.record(mark(i as Tick, i));
        }
        assert_eq!(trace.len(), TRACE_CAPACITY);
        assert_eq!(trace.dropped(), 3);

        let values: Vec<i64> = trace.marks("t").map(|(_, _, v)| v).collect();
        assert_eq!(values.first(), Some(&3));
        assert_eq!(values.last(), Some(&(TRACE_CAPACITY as i64 + 2)));
    }

    #[test]
    fn test_marks_filter_by_tag() {
        let mut trace = Trace::new();
        trace.record(mark(1, 10));
        trace.record(TraceEvent::Exited {
            tick: 2,
            thread: ThreadId::new(1, 0),
        });
        assert_eq!(trace.marks("t").count(), 1);
        assert_eq!(trace.marks("other").count(), 0);
        trace.clear();
        assert!(trace.is_empty());
    }
}
