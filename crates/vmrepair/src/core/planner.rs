//! First-fit-decreasing repair planner.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::common::{HostId, MigrationAction};
use crate::core::ordering::OrderingPolicy;
use crate::core::overload::OverloadDetector;
use crate::core::resource::{HostSnapshot, VmSnapshot};

/// How VMs are taken off an overloaded host before being placed again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvacuationStrategy {
    /// Every VM of an overloaded host is rescheduled and the host demand is reset to zero.
    #[default]
    AllAtOnce,
    /// The smallest VMs are evicted one by one until the host fits its capacity.
    Incremental,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Viable,
    NoViableConfiguration,
}

/// Outcome of a single planning invocation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SchedulerResult {
    pub state: SchedulerState,
    pub migrations: Vec<MigrationAction>,
    pub migration_count: usize,
    /// Host demands expected after applying the migrations, empty if no plan was found.
    pub predicted_demand: BTreeMap<HostId, f64>,
}

impl SchedulerResult {
    fn infeasible() -> Self {
        Self {
            state: SchedulerState::NoViableConfiguration,
            migrations: Vec::new(),
            migration_count: 0,
            predicted_demand: BTreeMap::new(),
        }
    }

    pub fn is_viable(&self) -> bool {
        self.state == SchedulerState::Viable
    }
}

/// Computes a complete plan that removes overload from the given hosts.
///
/// The planner works on snapshots only and never touches live state. Plans are all-or-nothing:
/// if some VM can't be placed, the result carries no migrations at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct CentralizedRepairPlanner {
    strategy: EvacuationStrategy,
    ordering: OrderingPolicy,
}

impl CentralizedRepairPlanner {
    pub fn new(strategy: EvacuationStrategy, ordering: OrderingPolicy) -> Self {
        Self { strategy, ordering }
    }

    pub fn strategy(&self) -> EvacuationStrategy {
        self.strategy
    }

    /// Detects overloaded hosts and plans their repair.
    pub fn plan_repair(&self, hosts: &[HostSnapshot]) -> SchedulerResult {
        let overloaded = OverloadDetector::new(self.ordering).detect_in(hosts);
        self.plan(hosts, &overloaded)
    }

    pub fn plan(&self, hosts: &[HostSnapshot], overloaded: &[HostId]) -> SchedulerResult {
        let mut hosts: Vec<&HostSnapshot> = hosts.iter().collect();
        hosts.sort_by_key(|h| h.id);

        let mut predicted: BTreeMap<HostId, f64> = hosts.iter().map(|h| (h.id, h.cpu_demand())).collect();

        let mut evacuated = BTreeSet::new();
        let mut to_schedule: Vec<(VmSnapshot, HostId)> = Vec::new();
        for host_id in overloaded {
            if !evacuated.insert(*host_id) {
                continue;
            }
            let host = match hosts.iter().find(|h| h.id == *host_id) {
                Some(host) => host,
                None => continue,
            };
            let evicted = self.evict(host);
            let freed: f64 = evicted.iter().map(|vm| vm.cpu_demand).sum();
            match self.strategy {
                EvacuationStrategy::AllAtOnce => predicted.insert(host.id, 0.),
                EvacuationStrategy::Incremental => predicted.insert(host.id, host.cpu_demand() - freed),
            };
            to_schedule.extend(evicted.into_iter().map(|vm| (vm, host.id)));
        }
        to_schedule.sort_by(|(a, _), (b, _)| self.ordering.compare_vms(a, b));

        let mut migrations = Vec::new();
        for (vm, source) in to_schedule {
            let destination = hosts
                .iter()
                .find(|h| predicted[&h.id] + vm.cpu_demand <= h.cpu_capacity)
                .map(|h| h.id);
            let destination = match destination {
                Some(destination) => destination,
                None => return SchedulerResult::infeasible(),
            };
            if let Some(demand) = predicted.get_mut(&destination) {
                *demand += vm.cpu_demand;
            }
            if destination != source {
                migrations.push(MigrationAction::new(vm.id, source, destination));
            }
        }

        SchedulerResult {
            state: SchedulerState::Viable,
            migration_count: migrations.len(),
            migrations,
            predicted_demand: predicted,
        }
    }

    fn evict(&self, host: &HostSnapshot) -> Vec<VmSnapshot> {
        match self.strategy {
            EvacuationStrategy::AllAtOnce => host.vms.clone(),
            EvacuationStrategy::Incremental => {
                let mut vms = host.vms.clone();
                self.ordering.sort_vms_ascending(&mut vms);
                let mut demand = host.cpu_demand();
                let mut evicted = Vec::new();
                for vm in vms {
                    if demand <= host.cpu_capacity {
                        break;
                    }
                    demand -= vm.cpu_demand;
                    evicted.push(vm);
                }
                evicted
            }
        }
    }
}
