use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use sugars::{rc, refcell};

use vmrepair_core::{log_debug, log_info, log_warn, Simulation, SimulationContext};

use crate::core::centralized::CentralizedScheduler;
use crate::core::common::{HostId, ShutdownSignal, VmId};
use crate::core::config::{Algorithm, SimulationConfig};
use crate::core::executor::ClusterExecutor;
use crate::core::failures::{CrashInjector, FailureAction};
use crate::core::load_model::LoadInjector;
use crate::core::membership::HeartbeatDirectory;
use crate::core::overload::OverloadDetector;
use crate::core::planner::{CentralizedRepairPlanner, SchedulerResult};
use crate::core::resource::ClusterState;
use crate::core::stats::SchedulingStats;
use crate::error::{ConfigError, ModelError};
use crate::negotiation::address::NodeAddress;
use crate::negotiation::message::{Envelope, Message};
use crate::negotiation::network::Network;
use crate::negotiation::node::{ActorNode, NegotiationSettings, NodeEnvironment, NodeState};
use crate::negotiation::propagation::{propagation_resolver, PropagationStrategy};
use crate::trace::{TraceEntry, TraceLog};

/// Wires the cluster model, schedulers and negotiation nodes into a single simulation.
pub struct ClusterSimulation {
    cluster: Rc<RefCell<ClusterState>>,
    stats: Rc<RefCell<SchedulingStats>>,
    trace: Rc<RefCell<TraceLog>>,
    membership: Rc<RefCell<HeartbeatDirectory>>,
    network: Rc<RefCell<Network>>,
    propagation: Rc<dyn PropagationStrategy>,
    shutdown: ShutdownSignal,
    nodes: BTreeMap<HostId, Rc<RefCell<ActorNode>>>,
    host_names: BTreeMap<HostId, String>,
    scheduler: Option<Rc<RefCell<CentralizedScheduler>>>,
    load_injector: Option<Rc<RefCell<LoadInjector>>>,
    crash_injector: CrashInjector,
    nodes_started: bool,
    sim: Simulation,
    ctx: SimulationContext,
    config: Rc<SimulationConfig>,
}

impl ClusterSimulation {
    pub fn new(mut sim: Simulation, config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let propagation: Rc<dyn PropagationStrategy> = Rc::from(propagation_resolver(&config.negotiation.propagation)?);
        let stats = rc!(refcell!(SchedulingStats::new()));
        let trace = rc!(refcell!(TraceLog::new()));
        let mut network = Network::new(stats.clone(), trace.clone(), sim.create_context("network"));
        network.set_delays(config.negotiation.message_delay, config.negotiation.max_message_delay);
        network.set_drop_rate(config.negotiation.drop_rate);
        let membership = rc!(refcell!(HeartbeatDirectory::new(config.membership.heartbeat_timeout)));
        let ctx = sim.create_context("simulation");
        let crash_injector = CrashInjector::new(&config.failures, sim.time());
        Ok(Self {
            cluster: rc!(refcell!(ClusterState::new())),
            stats,
            trace,
            membership,
            network: rc!(refcell!(network)),
            propagation,
            shutdown: ShutdownSignal::new(),
            nodes: BTreeMap::new(),
            host_names: BTreeMap::new(),
            scheduler: None,
            load_injector: None,
            crash_injector,
            nodes_started: false,
            sim,
            ctx,
            config: rc!(config),
        })
    }

    /// Creates hosts and VMs described by the config, VMs are spread over hosts round-robin.
    pub fn from_config(config: SimulationConfig) -> Result<Self, ConfigError> {
        let sim = Simulation::new(config.seed);
        let mut cluster_sim = Self::new(sim, config)?;
        let config = cluster_sim.config.clone();
        let hosts: Vec<HostId> = (0..config.hosts.count)
            .map(|i| {
                let name = format!("{}{}", config.hosts.name_prefix, i);
                cluster_sim.add_host(&name, config.hosts.cpu_capacity)
            })
            .collect();
        for i in 0..config.vms.count as usize {
            let host = hosts[i % hosts.len()];
            cluster_sim
                .add_vm(&format!("vm{}", i), 0., host)
                .map_err(|e| ConfigError::Invalid {
                    key: "vms.count",
                    reason: e.to_string(),
                })?;
        }
        cluster_sim.enable_load_injection()?;
        Ok(cluster_sim)
    }

    pub fn add_host(&mut self, name: &str, cpu_capacity: f64) -> HostId {
        let host = self.cluster.borrow_mut().add_host(name, cpu_capacity);
        let executor = ClusterExecutor::new(
            self.cluster.clone(),
            self.stats.clone(),
            self.trace.clone(),
            self.sim.create_context(format!("{}/executor", name)),
        );
        let env = NodeEnvironment {
            cluster: self.cluster.clone(),
            membership: self.membership.clone(),
            propagation: self.propagation.clone(),
            network: self.network.clone(),
            stats: self.stats.clone(),
            trace: self.trace.clone(),
            shutdown: self.shutdown.clone(),
        };
        let node = rc!(refcell!(ActorNode::new(
            host,
            self.planner(),
            Box::new(executor),
            env,
            NegotiationSettings::from_config(&self.config),
            self.sim.create_context(name),
        )));
        let id = self.sim.add_handler(name, node.clone());
        self.network.borrow_mut().add_node(host, id);
        self.nodes.insert(host, node);
        self.host_names.insert(host, name.to_string());
        host
    }

    pub fn add_vm(&mut self, name: &str, cpu_demand: f64, host: HostId) -> Result<VmId, ModelError> {
        self.cluster.borrow_mut().add_vm(name, cpu_demand, host)
    }

    pub fn set_vm_demand(&mut self, vm: VmId, cpu_demand: f64) -> Result<(), ModelError> {
        self.cluster.borrow_mut().set_vm_demand(vm, cpu_demand)
    }

    /// Registers the component changing VM demands every `load_period`.
    pub fn enable_load_injection(&mut self) -> Result<(), ConfigError> {
        if self.load_injector.is_some() {
            return Ok(());
        }
        let injector = rc!(refcell!(LoadInjector::new(
            self.cluster.clone(),
            self.stats.clone(),
            self.shutdown.clone(),
            OverloadDetector::new(self.config.ordering_policy()),
            &self.config.load,
            &self.config.vms,
            self.config.load_period,
            self.sim.create_context("load"),
        )?));
        self.sim.add_handler("load", injector.clone());
        injector.borrow_mut().start();
        self.load_injector = Some(injector);
        Ok(())
    }

    fn planner(&self) -> CentralizedRepairPlanner {
        CentralizedRepairPlanner::new(self.config.planner.evacuation, self.config.ordering_policy())
    }

    fn ensure_scheduler(&mut self) -> Rc<RefCell<CentralizedScheduler>> {
        if let Some(scheduler) = &self.scheduler {
            return scheduler.clone();
        }
        let executor = ClusterExecutor::new(
            self.cluster.clone(),
            self.stats.clone(),
            self.trace.clone(),
            self.sim.create_context("scheduler/executor"),
        );
        let scheduler = rc!(refcell!(CentralizedScheduler::new(
            self.planner(),
            self.cluster.clone(),
            Box::new(executor),
            self.stats.clone(),
            self.trace.clone(),
            self.shutdown.clone(),
            self.config.centralized.planning_period,
            self.sim.create_context("scheduler"),
        )));
        self.sim.add_handler("scheduler", scheduler.clone());
        self.scheduler = Some(scheduler.clone());
        scheduler
    }

    /// Starts the repair algorithm selected in the config.
    pub fn start(&mut self) {
        match self.config.algorithm {
            Algorithm::Centralized => self.start_centralized(),
            Algorithm::Decentralized => self.start_decentralized(),
        }
    }

    pub fn start_centralized(&mut self) {
        log_info!(self.ctx, "starting centralized repair");
        self.ensure_scheduler().borrow_mut().start();
    }

    pub fn start_decentralized(&mut self) {
        log_info!(self.ctx, "starting decentralized repair on {} nodes", self.nodes.len());
        self.nodes_started = true;
        for node in self.nodes.values() {
            node.borrow_mut().start();
        }
    }

    /// Runs a single centralized planning epoch immediately.
    pub fn run_centralized_epoch(&mut self) -> SchedulerResult {
        self.ensure_scheduler().borrow_mut().run_epoch()
    }

    /// Makes the node check its host for overload now, see [`ActorNode::check_local_overload`].
    pub fn check_local_overload(&mut self, host: HostId) {
        if let Some(node) = self.nodes.get(&host) {
            node.borrow_mut().check_local_overload();
        }
    }

    /// Stops the node: its handler is removed, its timers and incoming messages are discarded.
    pub fn crash_host(&mut self, host: HostId) -> Result<(), ModelError> {
        let name = self.host_names.get(&host).cloned().ok_or(ModelError::UnknownHost(host))?;
        if self.network.borrow().is_crashed(host) {
            log_debug!(self.ctx, "{} is already down", name);
            return Ok(());
        }
        let node_id = self.sim.lookup_id(&name);
        self.sim.remove_handler(&name);
        self.sim.cancel_events(|e| e.src == node_id || e.dst == node_id);
        self.network.borrow_mut().node_crashed(host);
        log_info!(self.ctx, "{} crashed", name);
        self.trace.borrow_mut().log(TraceEntry::HostCrashed {
            time: self.ctx.time(),
            node: host,
        });
        Ok(())
    }

    /// Restarts the crashed node with empty protocol state. Running hosts are left untouched.
    pub fn recover_host(&mut self, host: HostId) -> Result<(), ModelError> {
        let name = self.host_names.get(&host).cloned().ok_or(ModelError::UnknownHost(host))?;
        let node = self.nodes.get(&host).cloned().ok_or(ModelError::UnknownHost(host))?;
        if !self.network.borrow().is_crashed(host) {
            log_debug!(self.ctx, "{} is running, nothing to recover", name);
            return Ok(());
        }
        self.sim.add_handler(&name, node.clone());
        self.network.borrow_mut().node_recovered(host);
        node.borrow_mut().reset();
        if self.nodes_started {
            node.borrow_mut().start();
        }
        log_info!(self.ctx, "{} recovered", name);
        self.trace.borrow_mut().log(TraceEntry::HostRecovered {
            time: self.ctx.time(),
            node: host,
        });
        Ok(())
    }

    /// Blocks messages between the two groups in both directions.
    pub fn partition(&mut self, group1: &[HostId], group2: &[HostId]) {
        log_info!(self.ctx, "network partition {:?} / {:?}", group1, group2);
        self.network.borrow_mut().make_partition(group1, group2);
    }

    /// Blocks messages from `from` to `to`.
    pub fn disable_link(&mut self, from: HostId, to: HostId) {
        self.network.borrow_mut().disable_link(from, to);
    }

    pub fn enable_link(&mut self, from: HostId, to: HostId) {
        self.network.borrow_mut().enable_link(from, to);
    }

    /// Removes all partitions and disabled links.
    pub fn heal_network(&mut self) {
        log_info!(self.ctx, "network healed");
        self.network.borrow_mut().reset_network();
    }

    /// Sends an arbitrary message through the network, bypassing the protocol encoding.
    pub fn send_raw_message(&mut self, sender: NodeAddress, dest: NodeAddress, msg: Message) {
        self.network.borrow_mut().send(Envelope {
            sender,
            origin: sender,
            reply_to: sender,
            dest,
            msg,
        });
    }

    /// Mirrors the trace to a JSON-lines file, entries logged so far are written first.
    pub fn set_trace_file(&mut self, path: &Path) -> std::io::Result<()> {
        let mut log = TraceLog::with_log_file(path)?;
        for entry in self.trace.borrow().entries() {
            log.log(entry.clone());
        }
        *self.trace.borrow_mut() = log;
        Ok(())
    }

    /// Stops all periodic activities; pending messages are discarded on delivery.
    pub fn shutdown(&mut self) {
        log_info!(self.ctx, "shutdown");
        self.shutdown.trigger();
    }

    /// Starts the configured algorithm, runs for the configured duration and shuts down.
    pub fn run(&mut self) -> SchedulingStats {
        self.start();
        self.step_for_duration(self.config.duration);
        self.shutdown();
        self.sim.step_until_no_events();
        self.stats()
    }

    /// Processes events within `duration` from now, crashing and recovering hosts on schedule.
    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        let end_time = self.sim.time() + duration;
        while self.crash_injector.next_time() <= end_time {
            self.sim.step_until_time(self.crash_injector.next_time());
            self.inject_failures();
        }
        self.sim.step_until_time(end_time)
    }

    fn inject_failures(&mut self) {
        let running: Vec<HostId> = {
            let network = self.network.borrow();
            let cluster = self.cluster.borrow();
            cluster.host_ids().into_iter().filter(|h| !network.is_crashed(*h)).collect()
        };
        let now = self.sim.time();
        for action in self.crash_injector.fire(now, &running, &mut self.ctx) {
            let result = match action {
                FailureAction::Crash(host) => self.crash_host(host),
                FailureAction::Recover(host) => self.recover_host(host),
            };
            if let Err(e) = result {
                log_warn!(self.ctx, "failure injection: {}", e);
            }
        }
    }

    /// Processes events until none are left. Periodic activities keep producing events until shutdown.
    pub fn step_until_no_events(&mut self) {
        self.sim.step_until_no_events();
    }

    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    pub fn cluster(&self) -> Rc<RefCell<ClusterState>> {
        self.cluster.clone()
    }

    pub fn stats(&self) -> SchedulingStats {
        self.stats.borrow().clone()
    }

    pub fn trace(&self) -> Vec<TraceEntry> {
        self.trace.borrow().entries().clone()
    }

    pub fn node_state(&self, host: HostId) -> Option<NodeState> {
        self.nodes.get(&host).map(|node| node.borrow().state())
    }

    pub fn network(&self) -> Rc<RefCell<Network>> {
        self.network.clone()
    }

    pub fn config(&self) -> Rc<SimulationConfig> {
        self.config.clone()
    }
}
