//! Component-side access to the simulation.

use std::cell::RefCell;
use std::rc::Rc;

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::prelude::Distribution;

use crate::component::Id;
use crate::event::{EventData, EventId};
use crate::queue::Shared;

/// Handle through which a component reads the clock, draws random numbers and emits events.
///
/// Every event emitted through the context carries the context id as its source.
pub struct SimulationContext {
    id: Id,
    name: String,
    shared: Rc<RefCell<Shared>>,
}

impl SimulationContext {
    pub(crate) fn new(id: Id, name: &str, shared: Rc<RefCell<Shared>>) -> Self {
        Self {
            id,
            name: name.to_owned(),
            shared,
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time(&self) -> f64 {
        self.shared.borrow().queue.now()
    }

    /// Uniform float in _[0, 1)_.
    pub fn rand(&mut self) -> f64 {
        self.shared.borrow_mut().rand()
    }

    pub fn gen_range<T: SampleUniform, R: SampleRange<T>>(&mut self, range: R) -> T {
        self.shared.borrow_mut().gen_range(range)
    }

    pub fn sample_from_distribution<T, D: Distribution<T>>(&mut self, dist: &D) -> T {
        self.shared.borrow_mut().sample(dist)
    }

    fn push<T: EventData>(&mut self, data: T, dst: Id, delay: f64) -> EventId {
        self.shared.borrow_mut().queue.push(data, self.id, dst, delay)
    }

    /// Schedules `data` for delivery to `dst` after `delay`.
    pub fn emit<T: EventData>(&mut self, data: T, dst: Id, delay: f64) -> EventId {
        self.push(data, dst, delay)
    }

    pub fn emit_now<T: EventData>(&mut self, data: T, dst: Id) -> EventId {
        self.push(data, dst, 0.)
    }

    /// Schedules `data` for delivery to this component after `delay`.
    pub fn emit_self<T: EventData>(&mut self, data: T, delay: f64) -> EventId {
        self.push(data, self.id, delay)
    }

    pub fn emit_self_now<T: EventData>(&mut self, data: T) -> EventId {
        self.push(data, self.id, 0.)
    }

    /// Drops a pending event. No-op for events already delivered.
    pub fn cancel_event(&mut self, id: EventId) {
        self.shared.borrow_mut().queue.cancel(id);
    }
}
