use std::collections::{BinaryHeap, HashSet};

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::component::Id;
use crate::event::{Event, EventData, EventId};
use crate::log::log_incorrect_event;

const NEGATIVE_DELAY_TOLERANCE: f64 = 1e-12;

/// Pending events together with the clock they advance.
pub(crate) struct EventQueue {
    now: f64,
    pending: BinaryHeap<Event>,
    cancelled: HashSet<EventId>,
    issued: u64,
}

impl EventQueue {
    fn new() -> Self {
        Self {
            now: 0.,
            pending: BinaryHeap::new(),
            cancelled: HashSet::new(),
            issued: 0,
        }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    /// Moves the clock forward, never backward.
    pub fn advance_to(&mut self, time: f64) {
        if time > self.now {
            self.now = time;
        }
    }

    pub fn push<T: EventData>(&mut self, data: T, src: Id, dst: Id, delay: f64) -> EventId {
        let event = Event {
            id: self.issued,
            time: self.now + delay.max(0.),
            src,
            dst,
            data: Box::new(data),
        };
        if delay < -NEGATIVE_DELAY_TOLERANCE {
            log_incorrect_event(event, &format!("negative delay {}", delay));
            panic!("Event delay is negative! It is not allowed to add events from the past.");
        }
        self.pending.push(event);
        self.issued += 1;
        self.issued - 1
    }

    /// Removes the earliest live event and moves the clock to its time.
    pub fn pop(&mut self) -> Option<Event> {
        self.skip_cancelled();
        let event = self.pending.pop()?;
        self.now = event.time;
        Some(event)
    }

    pub fn next_time(&mut self) -> Option<f64> {
        self.skip_cancelled();
        self.pending.peek().map(|e| e.time)
    }

    fn skip_cancelled(&mut self) {
        while let Some(head) = self.pending.peek() {
            if !self.cancelled.remove(&head.id) {
                return;
            }
            self.pending.pop();
        }
    }

    pub fn cancel(&mut self, id: EventId) {
        if id < self.issued {
            self.cancelled.insert(id);
        }
    }

    pub fn cancel_where<F: Fn(&Event) -> bool>(&mut self, pred: F) {
        let matched: Vec<EventId> = self.pending.iter().filter(|e| pred(e)).map(|e| e.id).collect();
        self.cancelled.extend(matched);
    }
}

/// State shared by the simulation and all contexts.
pub(crate) struct Shared {
    pub queue: EventQueue,
    rng: Pcg64,
}

impl Shared {
    pub fn new(seed: u64) -> Self {
        Self {
            queue: EventQueue::new(),
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    pub fn rand(&mut self) -> f64 {
        self.rng.gen_range(0.0..1.0)
    }

    pub fn gen_range<T: SampleUniform, R: SampleRange<T>>(&mut self, range: R) -> T {
        self.rng.gen_range(range)
    }

    pub fn sample<T, D: Distribution<T>>(&mut self, dist: &D) -> T {
        dist.sample(&mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_head_is_skipped() {
        let mut queue = EventQueue::new();
        let a = queue.push((), 0, 0, 1.);
        queue.push((), 0, 1, 2.);
        queue.cancel(a);
        assert_eq!(queue.next_time(), Some(2.));
        let event = queue.pop().unwrap();
        assert_eq!(event.dst, 1);
        assert_eq!(queue.now(), 2.);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn clock_does_not_go_back() {
        let mut queue = EventQueue::new();
        queue.advance_to(5.);
        queue.advance_to(3.);
        assert_eq!(queue.now(), 5.);
    }
}
