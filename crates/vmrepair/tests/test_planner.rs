use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;

use vmrepair::core::common::{HostId, MigrationAction, VmId};
use vmrepair::core::ordering::OrderingPolicy;
use vmrepair::core::overload::OverloadDetector;
use vmrepair::core::planner::{CentralizedRepairPlanner, EvacuationStrategy, SchedulerState};
use vmrepair::core::resource::{ClusterState, HostSnapshot, ResourceView};

fn planner(strategy: EvacuationStrategy) -> CentralizedRepairPlanner {
    CentralizedRepairPlanner::new(strategy, OrderingPolicy::default())
}

/// Applies migrations to the snapshot and returns the resulting demand of every host.
fn apply(hosts: &[HostSnapshot], migrations: &[MigrationAction]) -> BTreeMap<HostId, f64> {
    let mut placement: BTreeMap<VmId, (HostId, f64)> = BTreeMap::new();
    for host in hosts {
        for vm in host.vms.iter() {
            placement.insert(vm.id, (host.id, vm.cpu_demand));
        }
    }
    for action in migrations {
        let entry = placement.get_mut(&action.vm).unwrap();
        assert_eq!(entry.0, action.source, "{} does not start from the VM host", action);
        assert_ne!(action.source, action.destination);
        entry.0 = action.destination;
    }
    let mut demand: BTreeMap<HostId, f64> = hosts.iter().map(|h| (h.id, 0.)).collect();
    for (host, cpu) in placement.values() {
        *demand.get_mut(host).unwrap() += cpu;
    }
    demand
}

#[rstest]
#[case(EvacuationStrategy::AllAtOnce)]
#[case(EvacuationStrategy::Incremental)]
// Host A (8000) runs X=1200 and Y=7800, host B (8000) runs 5000.
// X is the only VM that has to leave A and it fits on B.
fn test_relocates_small_vm_to_host_with_slack(#[case] strategy: EvacuationStrategy) {
    let a = HostSnapshot::new(HostId(0), 8000.)
        .with_vm(VmId(0), 1200.)
        .with_vm(VmId(1), 7800.);
    let b = HostSnapshot::new(HostId(1), 8000.).with_vm(VmId(2), 5000.);

    let result = planner(strategy).plan_repair(&[a, b]);

    assert_eq!(result.state, SchedulerState::Viable);
    assert_eq!(result.migration_count, 1);
    assert_eq!(
        result.migrations,
        vec![MigrationAction::new(VmId(0), HostId(0), HostId(1))]
    );
    assert_eq!(result.predicted_demand[&HostId(0)], 7800.);
    assert_eq!(result.predicted_demand[&HostId(1)], 6200.);
}

#[rstest]
#[case(EvacuationStrategy::AllAtOnce)]
#[case(EvacuationStrategy::Incremental)]
// VM of 15 can't fit on any host of capacity 10.
fn test_no_viable_configuration(#[case] strategy: EvacuationStrategy) {
    let hosts = vec![
        HostSnapshot::new(HostId(0), 10.),
        HostSnapshot::new(HostId(1), 10.).with_vm(VmId(0), 15.),
    ];

    let result = planner(strategy).plan_repair(&hosts);

    assert_eq!(result.state, SchedulerState::NoViableConfiguration);
    assert!(!result.is_viable());
    assert!(result.migrations.is_empty());
    assert_eq!(result.migration_count, 0);
    assert!(result.predicted_demand.is_empty());
}

#[rstest]
#[case(EvacuationStrategy::AllAtOnce)]
#[case(EvacuationStrategy::Incremental)]
// The first overloaded host can be repaired, the second one can't: nothing is returned.
fn test_partial_plans_are_never_returned(#[case] strategy: EvacuationStrategy) {
    let hosts = vec![
        HostSnapshot::new(HostId(0), 100.).with_vm(VmId(0), 60.).with_vm(VmId(1), 50.),
        HostSnapshot::new(HostId(1), 100.).with_vm(VmId(2), 150.),
        HostSnapshot::new(HostId(2), 100.),
    ];

    let result = planner(strategy).plan_repair(&hosts);

    assert_eq!(result.state, SchedulerState::NoViableConfiguration);
    assert!(result.migrations.is_empty());
}

#[rstest]
#[case(EvacuationStrategy::AllAtOnce)]
#[case(EvacuationStrategy::Incremental)]
fn test_balanced_cluster_needs_no_migrations(#[case] strategy: EvacuationStrategy) {
    let hosts = vec![
        HostSnapshot::new(HostId(0), 100.).with_vm(VmId(0), 60.).with_vm(VmId(1), 40.),
        HostSnapshot::new(HostId(1), 100.).with_vm(VmId(2), 10.),
    ];

    let result = planner(strategy).plan_repair(&hosts);

    assert_eq!(result.state, SchedulerState::Viable);
    assert!(result.migrations.is_empty());
    assert_eq!(result.migration_count, 0);
    assert_eq!(result.predicted_demand[&HostId(0)], 100.);
}

#[test]
// Host 1 (100) runs VMs of 20 and 90, host 0 (100) has slack of 95.
// All-at-once evacuation re-places the larger VM first and moves it to host 0,
// incremental evacuation only evicts the smaller VM.
fn test_evacuation_strategies_differ() {
    let hosts = vec![
        HostSnapshot::new(HostId(0), 100.).with_vm(VmId(0), 5.),
        HostSnapshot::new(HostId(1), 100.).with_vm(VmId(1), 20.).with_vm(VmId(2), 90.),
    ];

    let all_at_once = planner(EvacuationStrategy::AllAtOnce).plan_repair(&hosts);
    assert_eq!(
        all_at_once.migrations,
        vec![MigrationAction::new(VmId(2), HostId(1), HostId(0))]
    );
    assert_eq!(all_at_once.predicted_demand[&HostId(0)], 95.);
    assert_eq!(all_at_once.predicted_demand[&HostId(1)], 20.);

    let incremental = planner(EvacuationStrategy::Incremental).plan_repair(&hosts);
    assert_eq!(
        incremental.migrations,
        vec![MigrationAction::new(VmId(1), HostId(1), HostId(0))]
    );
    assert_eq!(incremental.predicted_demand[&HostId(0)], 25.);
    assert_eq!(incremental.predicted_demand[&HostId(1)], 90.);
}

#[test]
// Input order of hosts must not change the plan.
fn test_plan_is_deterministic() {
    let hosts = vec![
        HostSnapshot::new(HostId(0), 100.).with_vm(VmId(0), 50.).with_vm(VmId(1), 50.).with_vm(VmId(2), 30.),
        HostSnapshot::new(HostId(1), 100.).with_vm(VmId(3), 70.),
        HostSnapshot::new(HostId(2), 100.).with_vm(VmId(4), 40.),
        HostSnapshot::new(HostId(3), 100.).with_vm(VmId(5), 80.).with_vm(VmId(6), 45.),
    ];
    let mut reversed = hosts.clone();
    reversed.reverse();

    let planner = planner(EvacuationStrategy::AllAtOnce);
    let first = planner.plan_repair(&hosts);
    let second = planner.plan_repair(&hosts);
    let third = planner.plan_repair(&reversed);

    assert!(first.is_viable());
    assert!(!first.migrations.is_empty());
    assert_eq!(first, second);
    assert_eq!(first, third);
}

#[test]
// Only the overloaded hosts passed to the planner are repaired.
fn test_plan_for_given_hosts() {
    let hosts = vec![
        HostSnapshot::new(HostId(0), 100.).with_vm(VmId(0), 70.).with_vm(VmId(1), 40.),
        HostSnapshot::new(HostId(1), 100.).with_vm(VmId(2), 70.).with_vm(VmId(3), 40.),
        HostSnapshot::new(HostId(2), 100.),
    ];
    let result = planner(EvacuationStrategy::Incremental).plan(&hosts, &[HostId(1)]);
    assert_eq!(
        result.migrations,
        vec![MigrationAction::new(VmId(3), HostId(1), HostId(2))]
    );
}

#[rstest]
#[case(EvacuationStrategy::AllAtOnce)]
#[case(EvacuationStrategy::Incremental)]
// Viable plans never leave a host above its capacity.
fn test_capacity_invariant_on_random_clusters(#[case] strategy: EvacuationStrategy) {
    let mut rng = StdRng::seed_from_u64(42);
    let planner = planner(strategy);
    let mut viable = 0;
    for _ in 0..200 {
        let host_count = rng.gen_range(2..10);
        let mut hosts: Vec<HostSnapshot> = (0..host_count)
            .map(|i| HostSnapshot::new(HostId(i), rng.gen_range(500..1500) as f64))
            .collect();
        for vm in 0..rng.gen_range(1..40) {
            let host = rng.gen_range(0..host_count) as usize;
            let demand = rng.gen_range(10..400) as f64;
            hosts[host].vms.push(vmrepair::core::resource::VmSnapshot::new(VmId(vm), demand));
        }

        let result = planner.plan_repair(&hosts);
        if !result.is_viable() {
            assert!(result.migrations.is_empty());
            continue;
        }
        viable += 1;
        assert_eq!(result.migration_count, result.migrations.len());
        let demand = apply(&hosts, &result.migrations);
        for host in hosts.iter() {
            assert!(
                demand[&host.id] <= host.cpu_capacity,
                "{} is overloaded after repair: {} > {}",
                host.id,
                demand[&host.id],
                host.cpu_capacity
            );
            assert!((demand[&host.id] - result.predicted_demand[&host.id]).abs() < 1e-6);
        }
    }
    assert!(viable > 0);
}

#[test]
// The planner works the same on live cluster state.
fn test_plan_over_cluster_state() {
    let mut cluster = ClusterState::new();
    let a = cluster.add_host("a", 8000.);
    let b = cluster.add_host("b", 8000.);
    let x = cluster.add_vm("x", 1200., a).unwrap();
    cluster.add_vm("y", 7800., a).unwrap();
    cluster.add_vm("z", 5000., b).unwrap();

    assert_eq!(OverloadDetector::default().detect(&cluster), vec![a]);
    let result = planner(EvacuationStrategy::AllAtOnce).plan_repair(&cluster.hosts());
    for action in result.migrations.iter() {
        cluster.migrate(action.vm, action.source, action.destination).unwrap();
    }

    assert_eq!(cluster.get_vm(x).unwrap().host(), b);
    assert!(OverloadDetector::default().detect(&cluster).is_empty());
}
