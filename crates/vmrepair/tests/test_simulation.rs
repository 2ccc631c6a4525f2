use vmrepair::core::common::HostId;
use vmrepair::core::config::{Algorithm, SimulationConfig};
use vmrepair::core::planner::{EvacuationStrategy, SchedulerState};
use vmrepair::negotiation::node::NodeState;
use vmrepair::simulation::ClusterSimulation;
use vmrepair::trace::TraceEntry;
use vmrepair_core::Simulation;

fn name_wrapper(file_name: &str) -> String {
    format!("test-configs/{}", file_name)
}

fn config() -> SimulationConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    SimulationConfig::from_file(&name_wrapper("config.yaml")).unwrap()
}

#[test]
fn test_config_from_file() {
    let config = config();
    assert_eq!(config.seed, 7);
    assert_eq!(config.duration, 600.);
    assert_eq!(config.hosts.count, 8);
    assert_eq!(config.hosts.name_prefix, "host");
    assert_eq!(config.vms.cpu_consumption_slots, 4);
    assert_eq!(config.planner.evacuation, EvacuationStrategy::AllAtOnce);
    assert_eq!(config.negotiation.propagation, "Random[fanout=2]");
    // derived from the host count
    assert_eq!(config.negotiation.round_timeout, 2.);
    assert_eq!(config.negotiation.participant_lease, 4.);
    assert_eq!(config.algorithm, Algorithm::Centralized);
}

#[test]
// Single planning epoch over the whole cluster moves the small VM off the overloaded host.
fn test_centralized_epoch() {
    let mut cluster_sim = ClusterSimulation::new(Simulation::new(1), config()).unwrap();
    let a = cluster_sim.add_host("a", 8000.);
    let b = cluster_sim.add_host("b", 8000.);
    cluster_sim.add_vm("x", 1200., a).unwrap();
    cluster_sim.add_vm("y", 7800., a).unwrap();
    cluster_sim.add_vm("z", 5000., b).unwrap();

    let result = cluster_sim.run_centralized_epoch();
    assert_eq!(result.state, SchedulerState::Viable);
    assert_eq!(result.migration_count, 1);

    let cluster = cluster_sim.cluster();
    assert_eq!(cluster.borrow().cpu_demand(a), Some(7800.));
    assert_eq!(cluster.borrow().cpu_demand(b), Some(6200.));
    let stats = cluster_sim.stats();
    assert_eq!(stats.planning_epochs, 1);
    assert_eq!(stats.migrations, 1);
    assert_eq!(stats.infeasible_plans, 0);
    assert!(matches!(
        cluster_sim.trace().first(),
        Some(TraceEntry::PlanComputed { overloaded: 1, .. })
    ));
}

#[test]
// Infeasible plan is reported and leaves the cluster untouched.
fn test_centralized_epoch_without_viable_plan() {
    let mut cluster_sim = ClusterSimulation::new(Simulation::new(1), config()).unwrap();
    let a = cluster_sim.add_host("a", 10.);
    let b = cluster_sim.add_host("b", 10.);
    cluster_sim.add_vm("x", 15., b).unwrap();

    let result = cluster_sim.run_centralized_epoch();
    assert_eq!(result.state, SchedulerState::NoViableConfiguration);
    assert_eq!(cluster_sim.stats().infeasible_plans, 1);
    assert_eq!(cluster_sim.stats().migrations, 0);
    assert_eq!(cluster_sim.cluster().borrow().cpu_demand(a), Some(0.));
    assert_eq!(cluster_sim.cluster().borrow().cpu_demand(b), Some(15.));
}

#[test]
fn test_centralized_run() {
    let mut cluster_sim = ClusterSimulation::from_config(config()).unwrap();
    assert_eq!(cluster_sim.cluster().borrow().host_count(), 8);
    assert_eq!(cluster_sim.cluster().borrow().vm_ids().len(), 48);

    let stats = cluster_sim.run();

    assert_eq!(stats.planning_epochs, 20);
    assert_eq!(stats.overload_samples.len(), 11);
    assert!(stats.migrations > 0);
    assert_eq!(stats.rounds_started, 0);
    let applied = cluster_sim
        .trace()
        .iter()
        .filter(|e| matches!(e, TraceEntry::MigrationApplied { .. }))
        .count() as u64;
    assert_eq!(applied, stats.migrations);
}

#[test]
fn test_decentralized_run() {
    let mut config = config();
    config.algorithm = Algorithm::Decentralized;
    let mut cluster_sim = ClusterSimulation::from_config(config).unwrap();

    let stats = cluster_sim.run();

    assert_eq!(stats.planning_epochs, 0);
    assert!(stats.rounds_started > 0);
    assert!(stats.rounds_committed + stats.rounds_aborted <= stats.rounds_started);
    assert!(stats.rounds_completed <= stats.rounds_committed);
    assert!(stats.messages_sent > 0);
    assert!(cluster_sim.time() >= 600.);
}

#[test]
// Load keeps changing while rounds are negotiated.
// Right after a commit every destination of the committed plan must fit its capacity.
fn test_decentralized_commits_respect_capacity() {
    let mut config = config();
    config.algorithm = Algorithm::Decentralized;
    let load_period = config.load_period as u32;
    let mut cluster_sim = ClusterSimulation::from_config(config).unwrap();
    cluster_sim.start();

    let mut seen = 0;
    let mut checked = 0;
    for second in 1..=600u32 {
        cluster_sim.step_for_duration(1.);
        let trace = cluster_sim.trace();
        // demands change at multiples of the load period, skip these windows
        let load_changed = second % load_period == 0;
        let cluster = cluster_sim.cluster();
        let cluster = cluster.borrow();
        for entry in &trace[seen..] {
            if let TraceEntry::RoundCommitted { migrations, .. } = entry {
                if load_changed {
                    continue;
                }
                checked += 1;
                for action in migrations {
                    let capacity = cluster.get_host(action.destination).unwrap().cpu_capacity();
                    let demand = cluster.cpu_demand(action.destination).unwrap();
                    assert!(demand <= capacity, "{} holds {} > {}", action.destination, demand, capacity);
                }
            }
        }
        seen = trace.len();
    }
    assert!(checked > 0);
}

#[test]
// Hosts crash every 50 seconds for 20 seconds; the run is still fully determined by the seed.
fn test_runs_with_crashes_are_reproducible() {
    let run = || {
        let mut config = config();
        config.algorithm = Algorithm::Decentralized;
        config.failures.crash_period = 50.;
        config.failures.crash_duration = 20.;
        let mut cluster_sim = ClusterSimulation::from_config(config).unwrap();
        cluster_sim.run();
        cluster_sim.trace()
    };
    let trace = run();
    let crashes = trace
        .iter()
        .filter(|e| matches!(e, TraceEntry::HostCrashed { .. }))
        .count();
    let recoveries = trace
        .iter()
        .filter(|e| matches!(e, TraceEntry::HostRecovered { .. }))
        .count();
    // crashes at 50, 100, ..., 600, the last one is not recovered before the end
    assert_eq!(crashes, 12);
    assert_eq!(recoveries, 11);
    assert_eq!(trace, run());
}

#[test]
// Same config gives the same run.
fn test_runs_are_reproducible() {
    let run = |algorithm: Algorithm| {
        let mut config = config();
        config.algorithm = algorithm;
        let mut cluster_sim = ClusterSimulation::from_config(config).unwrap();
        cluster_sim.run();
        cluster_sim.trace()
    };
    assert_eq!(run(Algorithm::Centralized), run(Algorithm::Centralized));
    assert_eq!(run(Algorithm::Decentralized), run(Algorithm::Decentralized));
}

#[test]
// After shutdown nodes start no rounds and periodic activities stop.
fn test_shutdown_stops_nodes() {
    let mut config = config();
    config.negotiation.check_period = 1000.;
    let mut cluster_sim = ClusterSimulation::new(Simulation::new(1), config).unwrap();
    let a = cluster_sim.add_host("a", 8000.);
    cluster_sim.add_host("b", 8000.);
    cluster_sim.add_vm("x", 9000., a).unwrap();
    cluster_sim.start_decentralized();
    cluster_sim.step_for_duration(1.);

    cluster_sim.shutdown();
    cluster_sim.check_local_overload(a);
    cluster_sim.step_until_no_events();

    assert_eq!(cluster_sim.node_state(a), Some(NodeState::Idle));
    assert_eq!(cluster_sim.stats().rounds_started, 0);
    assert_eq!(cluster_sim.node_state(HostId(5)), None);
}

#[test]
// Trace file receives one JSON object per entry, including entries logged before it was set.
fn test_trace_file() {
    let path = std::env::temp_dir().join(format!("vmrepair-trace-{}.jsonl", std::process::id()));
    let mut cluster_sim = ClusterSimulation::new(Simulation::new(1), config()).unwrap();
    let a = cluster_sim.add_host("a", 8000.);
    cluster_sim.add_host("b", 8000.);
    cluster_sim.add_vm("x", 1200., a).unwrap();
    cluster_sim.add_vm("y", 7800., a).unwrap();
    cluster_sim.run_centralized_epoch();

    cluster_sim.set_trace_file(&path).unwrap();
    cluster_sim.run_centralized_epoch();

    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), cluster_sim.trace().len());
    for line in lines {
        assert!(serde_json::from_str::<serde_json::Value>(line).is_ok());
    }
}
