//! Events and their payloads.

use std::cmp::Ordering;

use downcast_rs::{impl_downcast, Downcast};
use serde::ser::Serialize;

use crate::component::Id;

pub type EventId = u64;

/// Event payload, implemented for every `Serialize + 'static` type.
pub trait EventData: Downcast + erased_serde::Serialize {}

impl_downcast!(EventData);

erased_serde::serialize_trait_object!(EventData);

impl<T: Serialize + 'static> EventData for T {}

pub struct Event {
    pub id: EventId,
    /// Delivery time.
    pub time: f64,
    pub src: Id,
    pub dst: Id,
    pub data: Box<dyn EventData>,
}

impl Event {
    fn delivery_key(&self) -> (f64, EventId) {
        (self.time, self.id)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

// `BinaryHeap` is a max-heap: the earliest time, then the lowest id, must compare greatest.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        let (time, id) = self.delivery_key();
        let (other_time, other_id) = other.delivery_key();
        other_time.total_cmp(&time).then(other_id.cmp(&id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
