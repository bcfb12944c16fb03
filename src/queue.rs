//! The scheduling primitive the router runs on.
//!
//! [`Scheduler`] is the seam between the routing core and whatever advances
//! simulated time. [`EventQueue`] is the in-crate implementation: a binary
//! heap ordered by `(time, insertion sequence)`, so events due at the same
//! instant are delivered in the order they were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::event::{Event, EventPayload};
use crate::types::{EntityId, SimTime};

/// Schedules events for later delivery.
pub trait Scheduler {
    /// The current simulated time.
    fn now(&self) -> SimTime;

    /// Delivers `payload` to `target` after `delay` time units.
    ///
    /// Events for the same instant are delivered in scheduling order.
    fn schedule(&mut self, target: EntityId, payload: EventPayload, delay: SimTime);
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    event: Event,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed: BinaryHeap is a max-heap and the earliest event must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .event
            .time
            .total_cmp(&self.event.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time-ordered event queue with a hard deadline.
///
/// # Example
///
/// ```
/// use fogloop::queue::{EventQueue, Scheduler};
/// use fogloop::event::EventPayload;
///
/// let mut queue = EventQueue::new(100.0);
/// queue.schedule(1, EventPayload::SensorEmit, 5.0);
/// queue.schedule(2, EventPayload::SensorEmit, 5.0);
///
/// assert_eq!(queue.pop().unwrap().target, 1);
/// assert_eq!(queue.now(), 5.0);
/// assert_eq!(queue.pop().unwrap().target, 2);
/// assert!(queue.pop().is_none());
/// ```
#[derive(Debug)]
pub struct EventQueue {
    heap: BinaryHeap<Pending>,
    now: SimTime,
    next_seq: u64,
    max_time: SimTime,
    dispatched: u64,
}

impl EventQueue {
    /// Creates an empty queue that never dispatches events after `max_time`.
    pub fn new(max_time: SimTime) -> Self {
        Self {
            heap: BinaryHeap::new(),
            now: 0.0,
            next_seq: 0,
            max_time,
            dispatched: 0,
        }
    }

    /// Schedules an event at an absolute time (never earlier than now).
    pub fn schedule_at(&mut self, target: EntityId, payload: EventPayload, time: SimTime) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Pending {
            seq,
            event: Event::new(time.max(self.now), target, payload),
        });
    }

    /// Removes the next event and advances the clock to it.
    ///
    /// Returns `None` when the queue is empty or the next event lies beyond
    /// the deadline; in the latter case the run is over.
    pub fn pop(&mut self) -> Option<Event> {
        let next_time = self.heap.peek()?.event.time;
        if next_time > self.max_time {
            return None;
        }
        let pending = self.heap.pop()?;
        self.now = pending.event.time;
        self.dispatched += 1;
        Some(pending.event)
    }

    /// Time of the next pending event.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|p| p.event.time)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn max_time(&self) -> SimTime {
        self.max_time
    }

    /// Number of events handed out by [`pop`](Self::pop).
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

impl Scheduler for EventQueue {
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule(&mut self, target: EntityId, payload: EventPayload, delay: SimTime) {
        let time = self.now + delay.max(0.0);
        self.schedule_at(target, payload, time);
    }
}
