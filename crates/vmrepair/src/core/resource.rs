//! Resource model: hosts, VMs and read-only snapshots of them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::common::{HostId, VmId};
use crate::error::ModelError;

/// Weight of the latest observation in the VM demand prediction.
pub const PREDICTION_WEIGHT: f64 = 0.5;

#[derive(Clone, Debug)]
pub struct VirtualMachine {
    pub id: VmId,
    pub name: String,
    cpu_demand: f64,
    predicted_demand: f64,
    host: HostId,
}

impl VirtualMachine {
    pub fn cpu_demand(&self) -> f64 {
        self.cpu_demand
    }

    /// Exponentially smoothed demand, used by the load-aware ordering.
    pub fn predicted_demand(&self) -> f64 {
        self.predicted_demand
    }

    /// Host currently running the VM.
    pub fn host(&self) -> HostId {
        self.host
    }
}

#[derive(Clone, Debug)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    cpu_capacity: f64,
    vms: BTreeSet<VmId>,
}

impl Host {
    pub fn cpu_capacity(&self) -> f64 {
        self.cpu_capacity
    }

    pub fn vms(&self) -> &BTreeSet<VmId> {
        &self.vms
    }
}

/// VM state as seen by planners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VmSnapshot {
    pub id: VmId,
    pub cpu_demand: f64,
    pub predicted_demand: f64,
}

impl VmSnapshot {
    pub fn new(id: VmId, cpu_demand: f64) -> Self {
        Self {
            id,
            cpu_demand,
            predicted_demand: cpu_demand,
        }
    }
}

/// Host state as seen by planners: capacity plus the VMs it runs, ordered by id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub id: HostId,
    pub cpu_capacity: f64,
    pub vms: Vec<VmSnapshot>,
}

impl HostSnapshot {
    pub fn new(id: HostId, cpu_capacity: f64) -> Self {
        Self {
            id,
            cpu_capacity,
            vms: Vec::new(),
        }
    }

    pub fn with_vm(mut self, id: VmId, cpu_demand: f64) -> Self {
        self.vms.push(VmSnapshot::new(id, cpu_demand));
        self
    }

    pub fn cpu_demand(&self) -> f64 {
        self.vms.iter().map(|vm| vm.cpu_demand).sum()
    }

    /// Unused capacity, negative for overloaded hosts.
    pub fn slack(&self) -> f64 {
        self.cpu_capacity - self.cpu_demand()
    }

    pub fn is_overloaded(&self) -> bool {
        self.cpu_demand() > self.cpu_capacity
    }
}

/// Read access to current host and VM state.
pub trait ResourceView {
    /// Returns snapshots of all hosts ordered by id.
    fn hosts(&self) -> Vec<HostSnapshot>;

    fn host(&self, id: HostId) -> Option<HostSnapshot>;
}

impl ResourceView for [HostSnapshot] {
    fn hosts(&self) -> Vec<HostSnapshot> {
        let mut hosts = self.to_vec();
        hosts.sort_by_key(|h| h.id);
        hosts
    }

    fn host(&self, id: HostId) -> Option<HostSnapshot> {
        self.iter().find(|h| h.id == id).cloned()
    }
}

impl ResourceView for Vec<HostSnapshot> {
    fn hosts(&self) -> Vec<HostSnapshot> {
        self.as_slice().hosts()
    }

    fn host(&self, id: HostId) -> Option<HostSnapshot> {
        self.as_slice().host(id)
    }
}

/// Live cluster state: the single owner of hosts and VMs.
#[derive(Clone, Debug, Default)]
pub struct ClusterState {
    hosts: BTreeMap<HostId, Host>,
    vms: BTreeMap<VmId, VirtualMachine>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&mut self, name: &str, cpu_capacity: f64) -> HostId {
        let id = HostId(self.hosts.len() as u32);
        self.hosts.insert(
            id,
            Host {
                id,
                name: name.to_string(),
                cpu_capacity,
                vms: BTreeSet::new(),
            },
        );
        id
    }

    pub fn add_vm(&mut self, name: &str, cpu_demand: f64, host_id: HostId) -> Result<VmId, ModelError> {
        check_demand(cpu_demand)?;
        let id = VmId(self.vms.len() as u32);
        let host = self.hosts.get_mut(&host_id).ok_or(ModelError::UnknownHost(host_id))?;
        host.vms.insert(id);
        self.vms.insert(
            id,
            VirtualMachine {
                id,
                name: name.to_string(),
                cpu_demand,
                predicted_demand: cpu_demand,
                host: host_id,
            },
        );
        Ok(id)
    }

    /// Updates the current demand of the VM and folds it into the predicted demand.
    pub fn set_vm_demand(&mut self, vm_id: VmId, cpu_demand: f64) -> Result<(), ModelError> {
        check_demand(cpu_demand)?;
        let vm = self.vms.get_mut(&vm_id).ok_or(ModelError::UnknownVm(vm_id))?;
        vm.predicted_demand = PREDICTION_WEIGHT * cpu_demand + (1. - PREDICTION_WEIGHT) * vm.predicted_demand;
        vm.cpu_demand = cpu_demand;
        Ok(())
    }

    /// Moves the VM between hosts. Fails without changes if the VM is no longer on `source`.
    pub fn migrate(&mut self, vm_id: VmId, source: HostId, destination: HostId) -> Result<(), ModelError> {
        let vm = self.vms.get_mut(&vm_id).ok_or(ModelError::UnknownVm(vm_id))?;
        if vm.host != source {
            return Err(ModelError::VmNotOnHost { vm: vm_id, host: source });
        }
        if !self.hosts.contains_key(&destination) {
            return Err(ModelError::UnknownHost(destination));
        }
        vm.host = destination;
        if let Some(host) = self.hosts.get_mut(&source) {
            host.vms.remove(&vm_id);
        }
        if let Some(host) = self.hosts.get_mut(&destination) {
            host.vms.insert(vm_id);
        }
        Ok(())
    }

    pub fn get_host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(&id)
    }

    pub fn get_vm(&self, id: VmId) -> Option<&VirtualMachine> {
        self.vms.get(&id)
    }

    pub fn host_ids(&self) -> Vec<HostId> {
        self.hosts.keys().cloned().collect()
    }

    pub fn vm_ids(&self) -> Vec<VmId> {
        self.vms.keys().cloned().collect()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Returns the sum of demands of VMs running on the host.
    pub fn cpu_demand(&self, host_id: HostId) -> Option<f64> {
        let host = self.hosts.get(&host_id)?;
        Some(host.vms.iter().filter_map(|vm| self.vms.get(vm)).map(|vm| vm.cpu_demand).sum())
    }

    pub fn host_snapshot(&self, id: HostId) -> Option<HostSnapshot> {
        self.hosts.get(&id).map(|host| self.snapshot_of(host))
    }

    /// Returns snapshots of all hosts ordered by id.
    pub fn snapshot(&self) -> Vec<HostSnapshot> {
        self.hosts.values().map(|host| self.snapshot_of(host)).collect()
    }

    fn snapshot_of(&self, host: &Host) -> HostSnapshot {
        HostSnapshot {
            id: host.id,
            cpu_capacity: host.cpu_capacity,
            vms: host
                .vms
                .iter()
                .filter_map(|vm| self.vms.get(vm))
                .map(|vm| VmSnapshot {
                    id: vm.id,
                    cpu_demand: vm.cpu_demand,
                    predicted_demand: vm.predicted_demand,
                })
                .collect(),
        }
    }
}

impl ResourceView for ClusterState {
    fn hosts(&self) -> Vec<HostSnapshot> {
        self.snapshot()
    }

    fn host(&self, id: HostId) -> Option<HostSnapshot> {
        self.host_snapshot(id)
    }
}

fn check_demand(cpu_demand: f64) -> Result<(), ModelError> {
    if cpu_demand.is_finite() && cpu_demand >= 0. {
        Ok(())
    } else {
        Err(ModelError::InvalidDemand(cpu_demand))
    }
}
