//! Deterministic ordering of VMs and hosts shared by all planners.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::core::resource::{HostSnapshot, VmSnapshot};

/// Orders by descending (optionally load-blended) CPU demand, ties broken by ascending id.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderingPolicy {
    pub use_load: bool,
    pub load_weight: f64,
}

impl Default for OrderingPolicy {
    fn default() -> Self {
        Self {
            use_load: false,
            load_weight: 0.5,
        }
    }
}

impl OrderingPolicy {
    pub fn new(use_load: bool, load_weight: f64) -> Self {
        Self { use_load, load_weight }
    }

    /// Sort key of the VM.
    pub fn vm_key(&self, vm: &VmSnapshot) -> f64 {
        if self.use_load {
            (1. - self.load_weight) * vm.cpu_demand + self.load_weight * vm.predicted_demand
        } else {
            vm.cpu_demand
        }
    }

    /// Sort key of the host: sum of its VM keys.
    pub fn host_key(&self, host: &HostSnapshot) -> f64 {
        host.vms.iter().map(|vm| self.vm_key(vm)).sum()
    }

    pub fn compare_vms(&self, a: &VmSnapshot, b: &VmSnapshot) -> Ordering {
        self.vm_key(b).total_cmp(&self.vm_key(a)).then_with(|| a.id.cmp(&b.id))
    }

    pub fn compare_hosts(&self, a: &HostSnapshot, b: &HostSnapshot) -> Ordering {
        self.host_key(b)
            .total_cmp(&self.host_key(a))
            .then_with(|| a.id.cmp(&b.id))
    }

    pub fn sort_vms(&self, vms: &mut [VmSnapshot]) {
        vms.sort_by(|a, b| self.compare_vms(a, b));
    }

    /// Ascending key, ties still broken by ascending id. Used to pick eviction victims smallest first.
    pub fn sort_vms_ascending(&self, vms: &mut [VmSnapshot]) {
        vms.sort_by(|a, b| self.vm_key(a).total_cmp(&self.vm_key(b)).then_with(|| a.id.cmp(&b.id)));
    }

    pub fn sort_hosts(&self, hosts: &mut [HostSnapshot]) {
        hosts.sort_by(|a, b| self.compare_hosts(a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::{HostId, VmId};

    fn vm(id: u32, demand: f64, predicted: f64) -> VmSnapshot {
        VmSnapshot {
            id: VmId(id),
            cpu_demand: demand,
            predicted_demand: predicted,
        }
    }

    fn ids(vms: &[VmSnapshot]) -> Vec<u32> {
        vms.iter().map(|vm| vm.id.0).collect()
    }

    #[test]
    fn vms_sorted_by_descending_demand_then_id() {
        let mut vms = vec![vm(3, 100., 100.), vm(1, 300., 300.), vm(2, 100., 100.), vm(0, 200., 200.)];
        OrderingPolicy::default().sort_vms(&mut vms);
        assert_eq!(ids(&vms), vec![1, 0, 2, 3]);
    }

    #[test]
    fn order_does_not_depend_on_input_order() {
        let policy = OrderingPolicy::default();
        let mut a = vec![vm(0, 5., 5.), vm(1, 5., 5.), vm(2, 7., 7.)];
        let mut b = vec![vm(2, 7., 7.), vm(1, 5., 5.), vm(0, 5., 5.)];
        policy.sort_vms(&mut a);
        policy.sort_vms(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn load_prediction_changes_order() {
        let mut vms = vec![vm(0, 100., 500.), vm(1, 200., 200.)];
        OrderingPolicy::default().sort_vms(&mut vms);
        assert_eq!(ids(&vms), vec![1, 0]);
        OrderingPolicy::new(true, 0.5).sort_vms(&mut vms);
        assert_eq!(ids(&vms), vec![0, 1]);
    }

    #[test]
    fn ascending_order_for_eviction() {
        let mut vms = vec![vm(0, 300., 300.), vm(2, 100., 100.), vm(1, 100., 100.)];
        OrderingPolicy::default().sort_vms_ascending(&mut vms);
        assert_eq!(ids(&vms), vec![1, 2, 0]);
    }

    #[test]
    fn hosts_sorted_by_load() {
        let mut hosts = vec![
            HostSnapshot::new(HostId(0), 10.).with_vm(VmId(0), 3.),
            HostSnapshot::new(HostId(1), 10.).with_vm(VmId(1), 9.),
            HostSnapshot::new(HostId(2), 10.).with_vm(VmId(2), 3.),
        ];
        OrderingPolicy::default().sort_hosts(&mut hosts);
        let order: Vec<u32> = hosts.iter().map(|h| h.id.0).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }
}
