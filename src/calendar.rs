//! Deterministic event calendar.
//!
//! Uses a `BinaryHeap` with reversed `Ord` on `CalendarEntry` to act as a
//! min-heap keyed by `(time, priority, seq)`. The sequence number is
//! handed out at scheduling time and is strictly increasing, so two
//! entries with equal `(time, priority)` come out in the order they went
//! in, and two runs with the same scheduling calls produce the same
//! dispatch order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{SimError, SimResult};
use crate::event::{EventId, Priority};
use crate::time::SimTime;

// ── Entry ─────────────────────────────────────────────────────────────

/// One scheduled occurrence of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarEntry {
    pub time: SimTime,
    pub priority: Priority,
    /// Scheduling order; the final tie-break.
    pub seq: u64,
    pub event: EventId,
}

impl CalendarEntry {
    fn key(&self) -> (SimTime, Priority, u64) {
        (self.time, self.priority, self.seq)
    }
}

/// Ordering: smallest `(time, priority, seq)` first.
///
/// Rust's `BinaryHeap` is a *max*-heap, so the natural ordering is
/// reversed here.
impl Ord for CalendarEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for CalendarEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── Calendar ──────────────────────────────────────────────────────────

/// The ordered set of not-yet-processed events.
///
/// Never advances time itself; the environment does that when it pops.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    queue: BinaryHeap<CalendarEntry>,
    next_seq: u64,
}

impl Calendar {
    /// Create a new, empty calendar.
    pub fn new() -> Self {
        Calendar {
            queue: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Insert `event` at `time`.
    ///
    /// Fails with `InvalidScheduling` if `time` is before `now`.
    pub fn schedule(
        &mut self,
        event: EventId,
        time: SimTime,
        priority: Priority,
        now: SimTime,
    ) -> SimResult<()> {
        if time < now {
            return Err(SimError::InvalidScheduling {
                requested: time,
                now,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(CalendarEntry {
            time,
            priority,
            seq,
            event,
        });
        Ok(())
    }

    /// Remove and return the earliest entry.
    pub fn pop_next(&mut self) -> SimResult<CalendarEntry> {
        self.queue.pop().ok_or(SimError::Empty)
    }

    /// Peek at the earliest entry without removing it.
    pub fn peek_next(&self) -> Option<&CalendarEntry> {
        self.queue.peek()
    }

    /// Returns `true` if no events are pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drain all entries in dispatch order.
    pub fn drain_ordered(&mut self) -> Vec<CalendarEntry> {
        let mut entries = Vec::with_capacity(self.queue.len());
        while let Some(e) = self.queue.pop() {
            entries.push(e);
        }
        entries
    }
}
