//! Deterministic two-class event queue.
//!
//! Two `BinaryHeap`s (reversed `Ord` on `Event`) act as min-heaps keyed
//! by `(time, id)`. Primary events win ties against secondary events with
//! the same time; within a class, the engine-minted ID preserves
//! scheduling order. Both engine variants pop from this one type, so
//! their ordering rules cannot drift apart.

use std::collections::BinaryHeap;

use crate::event::{Event, EventId, EventIdGen};
use crate::time::VirtualTime;

#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    primary: BinaryHeap<Event>,
    secondary: BinaryHeap<Event>,
    id_gen: EventIdGen,
    now: VirtualTime,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn now(&self) -> VirtualTime {
        self.now
    }

    /// Assign an ID and enqueue.
    ///
    /// # Panics
    /// Panics if the event is in the past.
    pub(crate) fn push(&mut self, mut event: Event) -> EventId {
        assert!(
            event.time() >= self.now,
            "cannot schedule event in the past: now={}, at={}",
            self.now,
            event.time()
        );
        let id = self.id_gen.next_id();
        event.assign_id(id);
        if event.is_secondary() {
            self.secondary.push(event);
        } else {
            self.primary.push(event);
        }
        id
    }

    /// Pop the next event and advance the clock to its time.
    pub(crate) fn pop_next(&mut self) -> Option<Event> {
        let event = if self.primary_first()? {
            self.primary.pop()
        } else {
            self.secondary.pop()
        }?;
        self.advance_to(event.time());
        Some(event)
    }

    /// Pop every event sharing the earliest `(time, class)`, in ID order.
    pub(crate) fn pop_batch(&mut self) -> Vec<Event> {
        let Some(primary) = self.primary_first() else {
            return Vec::new();
        };
        let heap = if primary {
            &mut self.primary
        } else {
            &mut self.secondary
        };

        let mut batch = Vec::new();
        let Some(first) = heap.pop() else {
            return batch;
        };
        let time = first.time();
        batch.push(first);
        while heap.peek().is_some_and(|e| e.time() == time) {
            if let Some(e) = heap.pop() {
                batch.push(e);
            }
        }
        self.advance_to(time);
        batch
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.primary.len() + self.secondary.len()
    }

    /// `Some(true)` if the next event comes from the primary heap,
    /// `None` when both are empty.
    fn primary_first(&self) -> Option<bool> {
        match (self.primary.peek(), self.secondary.peek()) {
            (None, None) => None,
            (Some(_), None) => Some(true),
            (None, Some(_)) => Some(false),
            (Some(p), Some(s)) => Some(p.time() <= s.time()),
        }
    }

    fn advance_to(&mut self, time: VirtualTime) {
        // Virtual time must never go backward.
        assert!(
            time >= self.now,
            "time went backward: current={}, event={}",
            self.now,
            time
        );
        self.now = time;
    }
}
