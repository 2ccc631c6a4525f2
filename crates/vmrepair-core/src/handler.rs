//! Event handlers.

use crate::event::Event;

/// A component that reacts to delivered events.
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use serde::Serialize;
/// use vmrepair_core::{cast, Event, EventHandler, Simulation};
///
/// #[derive(Serialize)]
/// pub struct Demand {
///     cpu: u32,
/// }
///
/// #[derive(Default)]
/// pub struct Meter {
///     total: u32,
/// }
///
/// impl EventHandler for Meter {
///     fn on(&mut self, event: Event) {
///         cast!(match event.data {
///             Demand { cpu } => {
///                 self.total += cpu;
///             }
///         })
///     }
/// }
///
/// let mut sim = Simulation::new(1);
/// let mut load = sim.create_context("load");
/// let meter = Rc::new(RefCell::new(Meter::default()));
/// let meter_id = sim.add_handler("meter", meter.clone());
/// load.emit(Demand { cpu: 500 }, meter_id, 1.);
/// load.emit(Demand { cpu: 250 }, meter_id, 2.);
/// sim.step_until_no_events();
/// assert_eq!(meter.borrow().total, 750);
/// ```
pub trait EventHandler {
    fn on(&mut self, event: Event);
}

/// Dispatches on the payload type of an event.
///
/// Every arm names a payload struct and destructures it. The first arm whose type matches runs, a payload
/// matching no arm is reported with [`log_unhandled_event`](crate::log::log_unhandled_event).
#[macro_export]
macro_rules! cast {
    ( match $event:ident.data { $( $payload:ident { $($field:tt)* } => { $($body:tt)* } )+ } ) => {
        $(
            if $event.data.is::<$payload>() {
                if let Ok(boxed) = $event.data.downcast::<$payload>() {
                    let $payload { $($field)* } = *boxed;
                    $($body)*
                }
            } else
        )*
        {
            $crate::log::log_unhandled_event($event);
        }
    }
}
