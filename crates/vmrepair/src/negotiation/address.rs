use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::common::HostId;

/// Mailbox of a node.
///
/// The scheduler mailbox receives requests from other rounds' initiators, the monitor mailbox receives
/// replies to rounds started by the node itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Scheduler,
    Monitor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Scheduler => write!(f, "scheduler"),
            Role::Monitor => write!(f, "monitor"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: HostId,
    pub role: Role,
}

impl NodeAddress {
    pub fn scheduler(host: HostId) -> Self {
        Self {
            host,
            role: Role::Scheduler,
        }
    }

    pub fn monitor(host: HostId) -> Self {
        Self {
            host,
            role: Role::Monitor,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}/{}", self.host.0, self.role)
    }
}
