//! Per-round bookkeeping of the initiator.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::common::HostId;
use crate::core::resource::HostSnapshot;
use crate::negotiation::message::RoundId;

pub struct Coalition {
    round: RoundId,
    excess: f64,
    deadline: f64,
    participants: BTreeSet<HostId>,
    offers: BTreeMap<HostId, HostSnapshot>,
    aggregate_slack: f64,
    contacted: BTreeSet<HostId>,
}

impl Coalition {
    pub fn new(round: RoundId, excess: f64, deadline: f64) -> Self {
        Self {
            round,
            excess,
            deadline,
            participants: BTreeSet::new(),
            offers: BTreeMap::new(),
            aggregate_slack: 0.,
            contacted: BTreeSet::new(),
        }
    }

    pub fn round(&self) -> RoundId {
        self.round
    }

    pub fn excess(&self) -> f64 {
        self.excess
    }

    pub fn deadline(&self) -> f64 {
        self.deadline
    }

    /// Sum of positive slacks offered so far.
    pub fn aggregate_slack(&self) -> f64 {
        self.aggregate_slack
    }

    pub fn participants(&self) -> &BTreeSet<HostId> {
        &self.participants
    }

    /// Adds the offering host to the coalition. Returns `false` if it has already joined.
    pub fn join(&mut self, host: HostSnapshot) -> bool {
        if !self.participants.insert(host.id) {
            return false;
        }
        self.contacted.insert(host.id);
        self.aggregate_slack += host.slack().max(0.);
        self.offers.insert(host.id, host);
        true
    }

    pub fn is_sufficient(&self) -> bool {
        self.aggregate_slack >= self.excess
    }

    pub fn mark_contacted(&mut self, host: HostId) {
        self.contacted.insert(host);
    }

    pub fn is_contacted(&self, host: HostId) -> bool {
        self.contacted.contains(&host)
    }

    pub fn contacted(&self) -> &BTreeSet<HostId> {
        &self.contacted
    }

    /// Hosts the round may plan over: the initiator itself plus every participant, ordered by id.
    pub fn scope(&self, initiator: HostSnapshot) -> Vec<HostSnapshot> {
        let mut hosts: Vec<HostSnapshot> = self.offers.values().cloned().collect();
        hosts.push(initiator);
        hosts.sort_by_key(|h| h.id);
        hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::VmId;

    fn coalition() -> Coalition {
        Coalition::new(
            RoundId {
                initiator: HostId(0),
                seq: 0,
            },
            1000.,
            5.,
        )
    }

    #[test]
    fn double_join_is_ignored() {
        let mut coalition = coalition();
        let offer = HostSnapshot::new(HostId(1), 1000.).with_vm(VmId(0), 400.);
        assert!(coalition.join(offer.clone()));
        assert!(!coalition.join(offer));
        assert_eq!(coalition.aggregate_slack(), 600.);
        assert_eq!(coalition.participants().len(), 1);
        assert!(!coalition.is_sufficient());
    }

    #[test]
    fn negative_slack_adds_nothing() {
        let mut coalition = coalition();
        coalition.join(HostSnapshot::new(HostId(1), 100.).with_vm(VmId(0), 300.));
        assert_eq!(coalition.aggregate_slack(), 0.);
        coalition.join(HostSnapshot::new(HostId(2), 1000.));
        assert!(coalition.is_sufficient());
    }

    #[test]
    fn scope_contains_initiator_and_participants() {
        let mut coalition = coalition();
        coalition.join(HostSnapshot::new(HostId(3), 100.));
        coalition.join(HostSnapshot::new(HostId(1), 100.));
        let ids: Vec<HostId> = coalition
            .scope(HostSnapshot::new(HostId(2), 100.))
            .iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec![HostId(1), HostId(2), HostId(3)]);
        assert!(coalition.is_contacted(HostId(3)));
    }
}
