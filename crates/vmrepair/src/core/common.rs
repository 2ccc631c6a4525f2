//! Identifiers and values shared by planners and the negotiation protocol.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Identifier of a physical host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub u32);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Identifier of a virtual machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VmId(pub u32);

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm-{}", self.0)
    }
}

/// Intent to move a VM from one host to another.
///
/// Planners never produce actions with equal source and destination.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MigrationAction {
    pub vm: VmId,
    pub source: HostId,
    pub destination: HostId,
}

impl MigrationAction {
    pub fn new(vm: VmId, source: HostId, destination: HostId) -> Self {
        Self {
            vm,
            source,
            destination,
        }
    }
}

impl fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.vm, self.source, self.destination)
    }
}

/// Global end-of-run condition shared by all long-living components.
///
/// Once triggered, components stop rescheduling their periodic activities and discard incoming messages.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    triggered: Rc<Cell<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.set(true);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.get()
    }
}
