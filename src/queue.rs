//! Component A: a time-ordered priority queue of scheduled events.
//!
//! This is the sole source of ordering in the simulator: everything that
//! happens — message delivery, timer firings, wakeups — is a `T` inserted
//! here with a scheduled [`LocalTime`], and [`EventQueue::drain`] is the only
//! thing that ever advances [`EventQueue::now`].
use std::collections::BTreeMap;

use localtime::LocalTime;

/// A min-heap of `(ts, event)` entries, keyed by `ts`, with deterministic
/// FIFO tie-breaking for entries scheduled at the same instant.
///
/// Entries are kept in a `BTreeMap` keyed by `(LocalTime, sequence)`: the
/// sequence number is assigned at insertion time and is strictly
/// increasing, so two events scheduled for the same `ts` are always
/// iterated in insertion order, never in an order `BTreeMap`'s key
/// comparison would otherwise pick arbitrarily.
#[derive(Debug)]
pub struct EventQueue<T> {
    /// Timestamp of the last-begun processing. No event may be inserted
    /// with a `ts` earlier than this.
    ts: LocalTime,
    /// Monotonically increasing insertion sequence, used purely for
    /// tie-breaking; never exposed.
    seq: u64,
    events: BTreeMap<(LocalTime, u64), T>,
}

impl<T> EventQueue<T> {
    /// Create an empty queue, with `Queue.ts` initialized to `start`.
    pub fn new(start: LocalTime) -> Self {
        Self {
            ts: start,
            seq: 0,
            events: BTreeMap::new(),
        }
    }

    /// The timestamp of the last-begun processing.
    pub fn now(&self) -> LocalTime {
        self.ts
    }

    /// Number of events still pending.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Insert `event`, scheduled to be delivered at `ts`.
    ///
    /// `ts` must be `>= self.now()`. In debug builds this is enforced with
    /// an assertion, since scheduling into the past is always a caller bug
    /// within this crate; in release builds the event is simply scheduled
    /// at `self.now()` instead, so that an embedder linking this crate
    /// without debug assertions never has the library abort their process.
    pub fn add(&mut self, ts: LocalTime, event: T) {
        debug_assert!(
            ts >= self.ts,
            "EventQueue::add: cannot schedule an event in the past"
        );
        let ts = if ts >= self.ts { ts } else { self.ts };
        let seq = self.seq;
        self.seq += 1;
        self.events.insert((ts, seq), event);
    }

    /// Peek at the timestamp of the next scheduled event, if any.
    pub fn peek_time(&self) -> Option<LocalTime> {
        self.events.keys().next().map(|(ts, _)| *ts)
    }

    /// Pop and return the next scheduled event if its `ts <= up_to`,
    /// advancing `Queue.ts` to that event's `ts`.
    ///
    /// Ties at the same `ts` are popped in insertion order, since the
    /// underlying map is keyed by `(ts, seq)` and `seq` increases
    /// monotonically with insertion.
    pub fn pop(&mut self, up_to: LocalTime) -> Option<(LocalTime, T)> {
        let key = *self.events.keys().next()?;
        if key.0 > up_to {
            return None;
        }
        let event = self.events.remove(&key).expect("key just observed");
        self.ts = key.0;
        Some((key.0, event))
    }

    /// Drain every event with `ts <= up_to`, invoking `f` for each, in
    /// strict timestamp order (FIFO within a timestamp). `Queue.ts` is
    /// updated before each invocation of `f`, so that `f` re-entrantly
    /// inserting new events observes the correct "now".
    pub fn drain(&mut self, up_to: LocalTime, mut f: impl FnMut(&mut Self, LocalTime, T)) {
        while let Some((ts, event)) = self.pop(up_to) {
            f(self, ts, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(ms: u64) -> LocalTime {
        LocalTime::default() + localtime::LocalDuration::from_millis(ms as u128)
    }

    #[test]
    fn fifo_tie_break_on_equal_timestamps() {
        let mut q = EventQueue::new(t(0));
        q.add(t(10), "a");
        q.add(t(10), "b");
        q.add(t(10), "c");

        let mut order = Vec::new();
        q.drain(t(10), |_, _, e| order.push(e));

        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn monotone_time_across_pops() {
        let mut q = EventQueue::new(t(0));
        q.add(t(5), "x");
        q.add(t(1), "y");

        let (ts1, _) = q.pop(t(100)).unwrap();
        assert_eq!(ts1, t(1));
        assert_eq!(q.now(), t(1));

        let (ts2, _) = q.pop(t(100)).unwrap();
        assert_eq!(ts2, t(5));
        assert!(ts2 >= ts1);
    }

    #[test]
    fn pop_respects_up_to_bound() {
        let mut q = EventQueue::new(t(0));
        q.add(t(50), "late");
        assert!(q.pop(t(10)).is_none());
        assert!(q.pop(t(50)).is_some());
    }
}
