//! Overload detection.

use crate::core::common::HostId;
use crate::core::ordering::OrderingPolicy;
use crate::core::resource::{HostSnapshot, ResourceView};

/// Flags hosts whose CPU demand exceeds capacity.
#[derive(Clone, Copy, Debug, Default)]
pub struct OverloadDetector {
    ordering: OrderingPolicy,
}

impl OverloadDetector {
    pub fn new(ordering: OrderingPolicy) -> Self {
        Self { ordering }
    }

    /// Returns overloaded hosts ordered by the ordering policy, most loaded first.
    pub fn detect<V: ResourceView + ?Sized>(&self, view: &V) -> Vec<HostId> {
        self.detect_in(&view.hosts())
    }

    pub fn detect_in(&self, hosts: &[HostSnapshot]) -> Vec<HostId> {
        let mut overloaded: Vec<HostSnapshot> = hosts.iter().filter(|h| h.is_overloaded()).cloned().collect();
        self.ordering.sort_hosts(&mut overloaded);
        overloaded.into_iter().map(|h| h.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::VmId;

    #[test]
    fn only_hosts_above_capacity_are_reported() {
        let hosts = vec![
            HostSnapshot::new(HostId(0), 100.).with_vm(VmId(0), 100.),
            HostSnapshot::new(HostId(1), 100.).with_vm(VmId(1), 120.),
            HostSnapshot::new(HostId(2), 100.).with_vm(VmId(2), 90.).with_vm(VmId(3), 60.),
            HostSnapshot::new(HostId(3), 100.),
        ];
        assert_eq!(OverloadDetector::default().detect(&hosts), vec![HostId(2), HostId(1)]);
    }

    #[test]
    fn balanced_cluster_has_no_overload() {
        let hosts = vec![HostSnapshot::new(HostId(0), 100.).with_vm(VmId(0), 10.)];
        assert!(OverloadDetector::default().detect(&hosts).is_empty());
    }
}
