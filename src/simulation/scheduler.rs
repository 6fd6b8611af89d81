//! Deterministic discrete-event queue.
//!
//! Events are delivered in non-decreasing time order. Events scheduled for
//! the same instant come out in the order they were inserted, which is what
//! makes runs reproducible: the MAC relies on a timer posted before a radio
//! call at the same timestamp firing first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::time::SimTime;

struct Scheduled<E> {
    time: SimTime,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest time, then lowest sequence first)
        other.time.cmp(&self.time).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of pending events keyed by (time, insertion sequence).
pub struct Scheduler<E> {
    now: SimTime,
    next_seq: u64,
    queue: BinaryHeap<Scheduled<E>>,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Scheduler {
            now: SimTime::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
        }
    }

    /// Current simulation time (the timestamp of the event being processed).
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn schedule_after(&mut self, delay: SimTime, event: E) {
        let time = self.now + delay;
        self.push(time, event);
    }

    /// Schedule at an absolute time. Times in the past are clamped to `now`.
    pub fn schedule_at(&mut self, time: SimTime, event: E) {
        let time = time.max(self.now);
        self.push(time, event);
    }

    fn push(&mut self, time: SimTime, event: E) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled { time, seq, event });
    }

    /// Remove the next event and advance the clock to its timestamp.
    pub fn pop(&mut self) -> Option<(SimTime, E)> {
        let next = self.queue.pop()?;
        debug_assert!(next.time >= self.now, "event queue went back in time");
        self.now = next.time;
        Some((next.time, next.event))
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|s| s.time)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
