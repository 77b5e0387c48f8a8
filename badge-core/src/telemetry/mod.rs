//! Scheduler event history shared by firmware and host targets.
//!
//! Every registry mutation and task fault is mirrored into a fixed-capacity
//! ring so the emulator console (and a debugger attached to the firmware) can
//! replay the most recent scheduling decisions without any allocation.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::scheduler::{TaskFault, TaskHandle};

/// Number of scheduler events retained in memory.
pub const EVENT_LOG_CAPACITY: usize = 32;

/// Sequence number assigned to each recorded event.
pub type EventSeq = u32;

/// Registry transitions captured by the [`EventLog`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulerEvent<K> {
    /// A task was registered.
    Added { handle: TaskHandle, key: K },
    /// A task was re-armed through `update`.
    Retargeted { handle: TaskHandle, target: Duration },
    /// A task asked to be removed after running.
    Completed { handle: TaskHandle, key: K },
    /// A task reported a fault and was removed.
    Faulted {
        handle: TaskHandle,
        key: K,
        fault: TaskFault,
    },
    /// A task was removed through `delete`.
    Deleted { handle: TaskHandle },
}

impl<K: fmt::Debug> fmt::Display for SchedulerEvent<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerEvent::Added { handle, key } => write!(f, "added {handle} {key:?}"),
            SchedulerEvent::Retargeted { handle, target } => {
                write!(f, "retargeted {handle} {}ms", target.as_millis())
            }
            SchedulerEvent::Completed { handle, key } => write!(f, "completed {handle} {key:?}"),
            SchedulerEvent::Faulted { handle, key, fault } => {
                write!(f, "faulted {handle} {key:?}: {fault}")
            }
            SchedulerEvent::Deleted { handle } => write!(f, "deleted {handle}"),
        }
    }
}

/// Event stored in the ring together with its ordering metadata.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EventRecord<K> {
    pub seq: EventSeq,
    /// Scheduler uptime (sum of processed tick periods) when the event happened.
    pub uptime: Duration,
    pub event: SchedulerEvent<K>,
}

/// Fixed-size ring of the most recent scheduler events.
pub struct EventLog<K, const CAPACITY: usize = EVENT_LOG_CAPACITY> {
    ring: HistoryBuf<EventRecord<K>, CAPACITY>,
    next_seq: EventSeq,
}

impl<K: Copy, const CAPACITY: usize> EventLog<K, CAPACITY> {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_seq: 0,
        }
    }

    /// Appends an event, evicting the oldest entry once the ring is full.
    pub fn record(&mut self, uptime: Duration, event: SchedulerEvent<K>) -> EventSeq {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.ring.write(EventRecord { seq, uptime, event });
        seq
    }

    /// Returns an iterator over the retained events in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, EventRecord<K>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent event, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&EventRecord<K>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Total number of events ever recorded, including evicted ones.
    #[must_use]
    pub const fn total(&self) -> EventSeq {
        self.next_seq
    }
}

impl<K: Copy, const CAPACITY: usize> Default for EventLog<K, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
