//! Simulation setup and stepping.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::Level::Trace;
use log::{debug, log_enabled, trace};
use serde_json::json;
use serde_type_name::type_name;

use crate::component::Id;
use crate::context::SimulationContext;
use crate::event::Event;
use crate::handler::EventHandler;
use crate::log::{get_colored, log_undelivered_event};
use crate::queue::Shared;

type HandlerRef = Rc<RefCell<dyn EventHandler>>;

#[derive(Default)]
struct Registry {
    ids: HashMap<String, Id>,
    names: Vec<String>,
    handlers: Vec<Option<HandlerRef>>,
}

impl Registry {
    fn id_or_insert(&mut self, name: &str) -> Id {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.names.len() as Id;
        self.ids.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        self.handlers.push(None);
        id
    }

    fn name(&self, id: Id) -> &str {
        self.names.get(id as usize).map(String::as_str).unwrap_or("unknown")
    }

    fn handler(&self, id: Id) -> Option<HandlerRef> {
        self.handlers.get(id as usize).cloned().flatten()
    }
}

/// Owns the event queue and the registered components.
///
/// Components share one clock and one seeded random generator. Events with equal time are delivered in
/// emission order, so a run is fully determined by the seed and the inputs.
pub struct Simulation {
    shared: Rc<RefCell<Shared>>,
    registry: Registry,
}

impl Simulation {
    pub fn new(seed: u64) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared::new(seed))),
            registry: Registry::default(),
        }
    }

    fn log_registry_change(&self, action: &str, name: &str, id: Id) {
        debug!(
            target: "simulation",
            "[{:.3} {} simulation] {}: {}",
            self.time(),
            get_colored("DEBUG", colored::Color::Blue),
            action,
            json!({"name": name, "id": id})
        );
    }

    /// Returns the id of a registered component.
    ///
    /// Panics if no component has this name.
    pub fn lookup_id(&self, name: &str) -> Id {
        match self.registry.ids.get(name) {
            Some(id) => *id,
            None => panic!("Component {} is not registered", name),
        }
    }

    /// Creates a context for the named component.
    ///
    /// Ids are assigned sequentially from 0. A name that is already registered keeps its id.
    pub fn create_context<S: AsRef<str>>(&mut self, name: S) -> SimulationContext {
        let name = name.as_ref();
        let id = self.registry.id_or_insert(name);
        self.log_registry_change("Created context", name, id);
        SimulationContext::new(id, name, self.shared.clone())
    }

    /// Attaches an event handler to the named component and returns its id.
    pub fn add_handler<S: AsRef<str>>(&mut self, name: S, handler: HandlerRef) -> Id {
        let name = name.as_ref();
        let id = self.registry.id_or_insert(name);
        self.registry.handlers[id as usize] = Some(handler);
        self.log_registry_change("Added handler", name, id);
        id
    }

    /// Detaches the handler of the named component.
    ///
    /// The id stays reserved. Events reaching the component before a new handler is attached are discarded.
    pub fn remove_handler<S: AsRef<str>>(&mut self, name: S) {
        let name = name.as_ref();
        let id = self.lookup_id(name);
        self.registry.handlers[id as usize] = None;
        self.log_registry_change("Removed handler", name, id);
    }

    pub fn time(&self) -> f64 {
        self.shared.borrow().queue.now()
    }

    /// Delivers the next pending event, returns `false` if the queue is empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use serde::Serialize;
    /// use vmrepair_core::Simulation;
    ///
    /// #[derive(Serialize)]
    /// pub struct Wake {}
    ///
    /// let mut sim = Simulation::new(123);
    /// let mut ctx = sim.create_context("comp");
    /// ctx.emit_self(Wake {}, 1.2);
    /// assert!(sim.step());
    /// assert_eq!(sim.time(), 1.2);
    /// assert!(!sim.step());
    /// ```
    pub fn step(&mut self) -> bool {
        let next = self.shared.borrow_mut().queue.pop();
        let event = match next {
            Some(event) => event,
            None => return false,
        };
        if log_enabled!(Trace) {
            self.trace_delivery(&event);
        }
        match self.registry.handler(event.dst) {
            Some(handler) => handler.borrow_mut().on(event),
            None => log_undelivered_event(event),
        }
        true
    }

    fn trace_delivery(&self, event: &Event) {
        let dst = self.registry.name(event.dst);
        trace!(
            target: dst,
            "[{:.3} {} {}] {}",
            event.time,
            get_colored("EVENT", colored::Color::BrightBlack),
            dst,
            json!({
                "type": type_name(&event.data).unwrap_or("unknown"),
                "data": event.data,
                "src": self.registry.name(event.src),
            })
        );
    }

    pub fn step_until_no_events(&mut self) {
        while self.step() {}
    }

    /// Delivers every event due at or before `time`, then sets the clock to `time`.
    ///
    /// Returns `true` if later events are still pending.
    pub fn step_until_time(&mut self, time: f64) -> bool {
        let pending = loop {
            let next = self.shared.borrow_mut().queue.next_time();
            match next {
                Some(t) if t <= time => {
                    self.step();
                }
                Some(_) => break true,
                None => break false,
            }
        };
        self.shared.borrow_mut().queue.advance_to(time);
        pending
    }

    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        self.step_until_time(self.time() + duration)
    }

    /// Drops all pending events matching the predicate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use serde::Serialize;
    /// use vmrepair_core::Simulation;
    ///
    /// #[derive(Serialize)]
    /// pub struct Wake {}
    ///
    /// let mut sim = Simulation::new(123);
    /// let mut a = sim.create_context("a");
    /// let mut b = sim.create_context("b");
    /// a.emit_self(Wake {}, 1.);
    /// b.emit_self(Wake {}, 2.);
    /// sim.cancel_events(|e| e.src == a.id());
    /// sim.step_until_no_events();
    /// assert_eq!(sim.time(), 2.);
    /// ```
    pub fn cancel_events<F: Fn(&Event) -> bool>(&mut self, pred: F) {
        self.shared.borrow_mut().queue.cancel_where(pred);
    }
}
