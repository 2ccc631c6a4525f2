#![doc = include_str!("../readme.md")]

pub mod component;
pub mod context;
pub mod event;
pub mod handler;
pub mod log;
mod queue;
pub mod simulation;

pub use colored;
#[doc(hidden)]
pub use ::log as __log;
pub use component::Id;
pub use context::SimulationContext;
pub use event::{Event, EventData, EventId};
pub use handler::EventHandler;
pub use simulation::Simulation;
