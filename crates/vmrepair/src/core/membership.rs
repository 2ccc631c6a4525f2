//! Liveness information consumed by the negotiation protocol.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::common::HostId;

/// Source of the set of hosts believed to be alive.
///
/// The answer may be stale: a host may have crashed after its last heartbeat.
pub trait Membership {
    /// Returns reachable hosts ordered by id.
    fn reachable(&self, now: f64) -> Vec<HostId>;

    fn heartbeat(&mut self, host: HostId, now: f64);
}

/// Considers a host reachable while its last heartbeat is not older than `timeout`.
pub struct HeartbeatDirectory {
    timeout: f64,
    last_beat: BTreeMap<HostId, f64>,
}

impl HeartbeatDirectory {
    pub fn new(timeout: f64) -> Self {
        Self {
            timeout,
            last_beat: BTreeMap::new(),
        }
    }

    pub fn last_heartbeat(&self, host: HostId) -> Option<f64> {
        self.last_beat.get(&host).copied()
    }
}

impl Membership for HeartbeatDirectory {
    fn reachable(&self, now: f64) -> Vec<HostId> {
        self.last_beat
            .iter()
            .filter(|(_, beat)| now - **beat <= self.timeout)
            .map(|(host, _)| *host)
            .collect()
    }

    fn heartbeat(&mut self, host: HostId, now: f64) {
        self.last_beat.insert(host, now);
    }
}

/// Fixed membership, heartbeats are ignored.
pub struct StaticMembership {
    hosts: BTreeSet<HostId>,
}

impl StaticMembership {
    pub fn new<I: IntoIterator<Item = HostId>>(hosts: I) -> Self {
        Self {
            hosts: hosts.into_iter().collect(),
        }
    }
}

impl Membership for StaticMembership {
    fn reachable(&self, _now: f64) -> Vec<HostId> {
        self.hosts.iter().copied().collect()
    }

    fn heartbeat(&mut self, _host: HostId, _now: f64) {}
}
