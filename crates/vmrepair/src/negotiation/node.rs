//! Per-host actor running the negotiation state machine.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use serde::Serialize;

use vmrepair_core::{cast, log_debug, log_info, log_trace, log_warn, Event, EventHandler, EventId, Id, SimulationContext};

use crate::core::common::{HostId, MigrationAction, ShutdownSignal};
use crate::core::config::SimulationConfig;
use crate::core::executor::MigrationExecutor;
use crate::core::membership::Membership;
use crate::core::planner::CentralizedRepairPlanner;
use crate::core::resource::{ClusterState, HostSnapshot};
use crate::core::stats::SchedulingStats;
use crate::error::ProtocolError;
use crate::negotiation::address::NodeAddress;
use crate::negotiation::coalition::Coalition;
use crate::negotiation::message::{Envelope, NegotiationMessage, RoundId};
use crate::negotiation::network::{MessageDelivered, Network};
use crate::negotiation::propagation::PropagationStrategy;
use crate::trace::{TraceEntry, TraceLog};

#[derive(Clone, Serialize)]
pub struct CheckOverload {}

#[derive(Clone, Serialize)]
pub struct Heartbeat {}

#[derive(Clone, Serialize)]
pub struct RoundTimeout {
    pub round: RoundId,
}

#[derive(Clone, Serialize)]
pub struct LeaseExpired {
    pub round: RoundId,
}

#[derive(Clone, Serialize)]
pub struct CommitTimeout {
    pub round: RoundId,
}

/// Timing and budget parameters of the protocol.
#[derive(Clone, Debug)]
pub struct NegotiationSettings {
    pub check_period: f64,
    pub round_timeout: f64,
    pub max_hops: u32,
    pub participant_lease: f64,
    pub heartbeat_period: f64,
}

impl NegotiationSettings {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            check_period: config.negotiation.check_period,
            round_timeout: config.negotiation.round_timeout,
            max_hops: config.negotiation.max_hops,
            participant_lease: config.negotiation.participant_lease,
            heartbeat_period: config.membership.heartbeat_period,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Idle,
    /// The node is the initiator of a round.
    CoalitionBuilding,
    /// The node helps another node's round.
    Participant,
    /// The node has applied its plan and waits for acknowledgements.
    Committing,
}

enum Phase {
    Idle,
    CoalitionBuilding {
        coalition: Coalition,
        timeout: EventId,
    },
    Participant {
        round: RoundId,
        lease: EventId,
    },
    Committing {
        round: RoundId,
        pending: BTreeSet<HostId>,
        timeout: EventId,
    },
}

/// Shared collaborators of all nodes.
#[derive(Clone)]
pub struct NodeEnvironment {
    pub cluster: Rc<RefCell<ClusterState>>,
    pub membership: Rc<RefCell<dyn Membership>>,
    pub propagation: Rc<dyn PropagationStrategy>,
    pub network: Rc<RefCell<Network>>,
    pub stats: Rc<RefCell<SchedulingStats>>,
    pub trace: Rc<RefCell<TraceLog>>,
    pub shutdown: ShutdownSignal,
}

/// Negotiation actor of a single host.
///
/// Incoming messages are queued in the mailbox and handled strictly one at a time. A message that
/// can't be handled is logged and skipped, the node keeps running until shutdown.
pub struct ActorNode {
    host: HostId,
    phase: Phase,
    mailbox: VecDeque<Envelope>,
    next_round: u64,
    planner: CentralizedRepairPlanner,
    executor: Box<dyn MigrationExecutor>,
    env: NodeEnvironment,
    settings: NegotiationSettings,
    ctx: SimulationContext,
}

impl ActorNode {
    pub fn new(
        host: HostId,
        planner: CentralizedRepairPlanner,
        executor: Box<dyn MigrationExecutor>,
        env: NodeEnvironment,
        settings: NegotiationSettings,
        ctx: SimulationContext,
    ) -> Self {
        Self {
            host,
            phase: Phase::Idle,
            mailbox: VecDeque::new(),
            next_round: 0,
            planner,
            executor,
            env,
            settings,
            ctx,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    pub fn state(&self) -> NodeState {
        match self.phase {
            Phase::Idle => NodeState::Idle,
            Phase::CoalitionBuilding { .. } => NodeState::CoalitionBuilding,
            Phase::Participant { .. } => NodeState::Participant,
            Phase::Committing { .. } => NodeState::Committing,
        }
    }

    /// Starts heartbeats and periodic overload checks.
    pub fn start(&mut self) {
        self.env.membership.borrow_mut().heartbeat(self.host, self.ctx.time());
        self.ctx.emit_self(Heartbeat {}, self.settings.heartbeat_period);
        let offset = self.ctx.rand() * self.settings.check_period;
        self.ctx.emit_self(CheckOverload {}, self.settings.check_period + offset);
    }

    /// Forgets all round state, used when the host recovers after a crash.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.mailbox.clear();
    }

    /// Starts a new round if the host is idle and overloaded.
    pub fn check_local_overload(&mut self) {
        if self.env.shutdown.is_triggered() || !matches!(self.phase, Phase::Idle) {
            return;
        }
        let snapshot = match self.own_snapshot() {
            Some(snapshot) => snapshot,
            None => return,
        };
        if !snapshot.is_overloaded() {
            return;
        }

        let excess = snapshot.cpu_demand() - snapshot.cpu_capacity;
        let round = RoundId {
            initiator: self.host,
            seq: self.next_round,
        };
        self.next_round += 1;
        let timeout = self.ctx.emit_self(RoundTimeout { round }, self.settings.round_timeout);
        let coalition = Coalition::new(round, excess, self.ctx.time() + self.settings.round_timeout);
        log_info!(self.ctx, "overloaded by {:.1}, starting round {}", excess, round);
        self.env.stats.borrow_mut().rounds_started += 1;
        self.env.trace.borrow_mut().log(TraceEntry::RoundStarted {
            time: self.ctx.time(),
            node: self.host,
            round,
            excess,
        });
        self.phase = Phase::CoalitionBuilding { coalition, timeout };
        self.contact_next();
    }

    fn own_snapshot(&self) -> Option<HostSnapshot> {
        self.env.cluster.borrow().host_snapshot(self.host)
    }

    fn reachable_peers(&self, exclude: impl Fn(HostId) -> bool) -> Vec<HostId> {
        self.env
            .membership
            .borrow()
            .reachable(self.ctx.time())
            .into_iter()
            .filter(|h| *h != self.host && !exclude(*h))
            .collect()
    }

    /// Sends the resource request to the next not yet contacted peers.
    fn contact_next(&mut self) {
        let (round, excess, collected, deadline, contacted) = match &self.phase {
            Phase::CoalitionBuilding { coalition, .. } => (
                coalition.round(),
                coalition.excess(),
                coalition.aggregate_slack(),
                coalition.deadline(),
                coalition.contacted().clone(),
            ),
            _ => return,
        };
        let candidates = self.reachable_peers(|h| contacted.contains(&h));
        if candidates.is_empty() {
            log_debug!(self.ctx, "no more candidates for round {}", round);
            return;
        }
        let targets = self.env.propagation.select(self.host, &candidates, &mut self.ctx);
        if let Phase::CoalitionBuilding { coalition, .. } = &mut self.phase {
            for target in targets.iter() {
                coalition.mark_contacted(*target);
            }
        }

        let mut visited: Vec<HostId> = contacted.into_iter().chain(targets.iter().copied()).collect();
        visited.push(self.host);
        visited.sort();
        visited.dedup();
        let me = NodeAddress::monitor(self.host);
        for target in targets {
            log_debug!(
                self.ctx,
                "asking {} for {:.1} in round {} due at {:.3}",
                target,
                excess - collected,
                round,
                deadline
            );
            let msg = NegotiationMessage::ResourceRequest {
                round,
                excess,
                collected,
                hops_left: self.settings.max_hops,
                visited: visited.clone(),
            };
            self.send(me, NodeAddress::scheduler(target), me, me, msg);
        }
    }

    fn send(
        &mut self,
        sender: NodeAddress,
        dest: NodeAddress,
        origin: NodeAddress,
        reply_to: NodeAddress,
        msg: NegotiationMessage,
    ) {
        match msg.encode() {
            Ok(msg) => self.env.network.borrow_mut().send(Envelope {
                sender,
                origin,
                reply_to,
                dest,
                msg,
            }),
            Err(e) => log_warn!(self.ctx, "can't send message to {}: {}", dest, e),
        }
    }

    fn on_message_delivered(&mut self, envelope: Envelope) {
        if self.env.shutdown.is_triggered() {
            log_trace!(self.ctx, "discarded {} after shutdown", envelope.msg.tip);
            return;
        }
        self.mailbox.push_back(envelope);
        while let Some(envelope) = self.mailbox.pop_front() {
            let tip = envelope.msg.tip.clone();
            if let Err(e) = self.handle_envelope(envelope) {
                log_warn!(self.ctx, "discarded message: {}", e);
                self.env.stats.borrow_mut().malformed_messages += 1;
                self.env.trace.borrow_mut().log(TraceEntry::MalformedMessage {
                    time: self.ctx.time(),
                    node: self.host,
                    tip,
                    error: e.to_string(),
                });
            }
        }
    }

    fn handle_envelope(&mut self, envelope: Envelope) -> Result<(), ProtocolError> {
        let msg = NegotiationMessage::decode(&envelope.msg)?;
        if msg.mailbox() != envelope.dest.role {
            return Err(ProtocolError::UnexpectedMessage {
                tip: msg.tip(),
                role: envelope.dest.role.to_string(),
            });
        }
        log_trace!(self.ctx, "received {:?} from {}", envelope.msg, envelope.sender);
        match msg {
            NegotiationMessage::ResourceRequest {
                round,
                excess,
                collected,
                hops_left,
                visited,
            } => self.on_request(&envelope, round, excess, collected, hops_left, visited),
            NegotiationMessage::Offer {
                round,
                slack,
                host,
                forwarded,
            } => self.on_offer(envelope.sender, round, slack, host, forwarded),
            NegotiationMessage::Busy { round } => self.on_busy(envelope.sender, round),
            NegotiationMessage::Commit { round, migrations } => self.on_commit(&envelope, round, migrations),
            NegotiationMessage::Ack { round } => self.on_ack(envelope.sender, round),
            NegotiationMessage::Abort { round } => self.on_abort(round),
        }
        Ok(())
    }

    fn on_request(
        &mut self,
        envelope: &Envelope,
        round: RoundId,
        excess: f64,
        collected: f64,
        hops_left: u32,
        visited: Vec<HostId>,
    ) {
        let me = NodeAddress::scheduler(self.host);
        match self.phase {
            Phase::Idle => {}
            Phase::Participant { round: current, .. } if current == round => {
                log_debug!(self.ctx, "already participating in round {}", round);
                return;
            }
            _ => {
                log_debug!(self.ctx, "busy, rejecting round {}", round);
                self.send(
                    me,
                    envelope.reply_to,
                    envelope.origin,
                    envelope.reply_to,
                    NegotiationMessage::Busy { round },
                );
                return;
            }
        }

        let snapshot = match self.own_snapshot() {
            Some(snapshot) => snapshot,
            None => return,
        };
        let slack = snapshot.slack();
        let collected = collected + slack.max(0.);
        let targets = if collected < excess && hops_left > 0 {
            let candidates = self.reachable_peers(|h| visited.contains(&h));
            if candidates.is_empty() {
                Vec::new()
            } else {
                self.env.propagation.select(self.host, &candidates, &mut self.ctx)
            }
        } else {
            Vec::new()
        };

        log_debug!(self.ctx, "offering {:.1} to round {}", slack, round);
        self.send(
            me,
            envelope.reply_to,
            envelope.origin,
            envelope.reply_to,
            NegotiationMessage::Offer {
                round,
                slack,
                host: snapshot,
                forwarded: !targets.is_empty(),
            },
        );
        let lease = self.ctx.emit_self(LeaseExpired { round }, self.settings.participant_lease);
        self.phase = Phase::Participant { round, lease };

        let mut visited = visited;
        visited.push(self.host);
        visited.extend(targets.iter().copied());
        visited.sort();
        visited.dedup();
        for target in targets {
            log_debug!(self.ctx, "relaying round {} to {}", round, target);
            let msg = NegotiationMessage::ResourceRequest {
                round,
                excess,
                collected,
                hops_left: hops_left - 1,
                visited: visited.clone(),
            };
            self.send(me, NodeAddress::scheduler(target), envelope.origin, envelope.reply_to, msg);
        }
    }

    fn on_offer(&mut self, sender: NodeAddress, round: RoundId, slack: f64, host: HostSnapshot, forwarded: bool) {
        let current = matches!(
            &self.phase,
            Phase::CoalitionBuilding { coalition, .. } if coalition.round() == round
        );
        if !current {
            log_debug!(self.ctx, "late offer from {} for round {}, releasing it", sender, round);
            let me = NodeAddress::monitor(self.host);
            self.send(
                me,
                NodeAddress::scheduler(sender.host),
                NodeAddress::monitor(round.initiator),
                me,
                NegotiationMessage::Abort { round },
            );
            return;
        }
        self.env.trace.borrow_mut().log(TraceEntry::OfferReceived {
            time: self.ctx.time(),
            node: self.host,
            round,
            from: host.id,
            slack,
        });
        let (joined, sufficient, collected, excess) = match &mut self.phase {
            Phase::CoalitionBuilding { coalition, .. } => {
                let joined = coalition.join(host);
                (
                    joined,
                    coalition.is_sufficient(),
                    coalition.aggregate_slack(),
                    coalition.excess(),
                )
            }
            _ => return,
        };
        if !joined {
            log_debug!(self.ctx, "{} has already joined round {}", sender, round);
            return;
        }
        log_debug!(
            self.ctx,
            "{} joined round {}, collected {:.1} of {:.1}",
            sender.host,
            round,
            collected,
            excess
        );
        if sufficient {
            self.try_commit();
        } else if !forwarded {
            self.contact_next();
        }
    }

    /// Plans over the coalition hosts and commits the plan if it is viable.
    fn try_commit(&mut self) {
        let own = match self.own_snapshot() {
            Some(snapshot) => snapshot,
            None => return,
        };
        let (round, timeout, scope, participants) = match &self.phase {
            Phase::CoalitionBuilding { coalition, timeout } => (
                coalition.round(),
                *timeout,
                coalition.scope(own),
                coalition.participants().clone(),
            ),
            _ => return,
        };
        // offers may be stale by now, plan over the current state of the coalition hosts
        let live_scope: Vec<HostSnapshot> = {
            let cluster = self.env.cluster.borrow();
            scope.iter().filter_map(|h| cluster.host_snapshot(h.id)).collect()
        };
        let result = self.planner.plan(&live_scope, &[self.host]);
        if !result.is_viable() {
            log_debug!(self.ctx, "no viable plan within coalition of round {}", round);
            self.contact_next();
            return;
        }

        self.ctx.cancel_event(timeout);
        for action in result.migrations.iter() {
            self.executor.relocate(action);
        }
        log_info!(
            self.ctx,
            "round {} committed with {} migrations and {} participants",
            round,
            result.migration_count,
            participants.len()
        );
        self.env.stats.borrow_mut().rounds_committed += 1;
        self.env.trace.borrow_mut().log(TraceEntry::RoundCommitted {
            time: self.ctx.time(),
            node: self.host,
            round,
            migrations: result.migrations.clone(),
        });

        let me = NodeAddress::monitor(self.host);
        for participant in participants.iter() {
            let msg = NegotiationMessage::Commit {
                round,
                migrations: result.migrations.clone(),
            };
            self.send(me, NodeAddress::scheduler(*participant), me, me, msg);
        }
        if participants.is_empty() {
            self.complete_round(round);
        } else {
            let timeout = self.ctx.emit_self(CommitTimeout { round }, self.settings.round_timeout);
            self.phase = Phase::Committing {
                round,
                pending: participants,
                timeout,
            };
        }
    }

    fn complete_round(&mut self, round: RoundId) {
        log_debug!(self.ctx, "round {} completed", round);
        self.phase = Phase::Idle;
        self.env.stats.borrow_mut().rounds_completed += 1;
        self.env.trace.borrow_mut().log(TraceEntry::RoundCompleted {
            time: self.ctx.time(),
            node: self.host,
            round,
        });
    }

    fn on_busy(&mut self, sender: NodeAddress, round: RoundId) {
        match &self.phase {
            Phase::CoalitionBuilding { coalition, .. } if coalition.round() == round => {}
            _ => return,
        }
        log_debug!(self.ctx, "{} is busy", sender.host);
        self.env.stats.borrow_mut().busy_replies += 1;
        self.env.trace.borrow_mut().log(TraceEntry::BusyReceived {
            time: self.ctx.time(),
            node: self.host,
            round,
            from: sender.host,
        });
        self.contact_next();
    }

    fn on_commit(&mut self, envelope: &Envelope, round: RoundId, migrations: Vec<MigrationAction>) {
        let me = NodeAddress::scheduler(self.host);
        self.send(
            me,
            envelope.reply_to,
            envelope.origin,
            envelope.reply_to,
            NegotiationMessage::Ack { round },
        );
        match self.phase {
            Phase::Participant { round: current, lease } if current == round => {
                let incoming = migrations.iter().filter(|a| a.destination == self.host).count();
                log_debug!(self.ctx, "round {} committed, {} VMs moved here", round, incoming);
                self.ctx.cancel_event(lease);
                self.phase = Phase::Idle;
            }
            _ => log_debug!(self.ctx, "stale commit for round {}", round),
        }
    }

    fn on_ack(&mut self, sender: NodeAddress, round: RoundId) {
        let done = match &mut self.phase {
            Phase::Committing {
                round: current,
                pending,
                timeout,
            } if *current == round => {
                pending.remove(&sender.host);
                if pending.is_empty() {
                    Some(*timeout)
                } else {
                    None
                }
            }
            _ => return,
        };
        if let Some(timeout) = done {
            self.ctx.cancel_event(timeout);
            self.complete_round(round);
        }
    }

    fn on_abort(&mut self, round: RoundId) {
        if let Phase::Participant { round: current, lease } = self.phase {
            if current == round {
                log_debug!(self.ctx, "round {} aborted by initiator", round);
                self.ctx.cancel_event(lease);
                self.phase = Phase::Idle;
            }
        }
    }

    fn on_round_timeout(&mut self, round: RoundId) {
        let participants = match &self.phase {
            Phase::CoalitionBuilding { coalition, .. } if coalition.round() == round => {
                coalition.participants().clone()
            }
            _ => return,
        };
        log_info!(
            self.ctx,
            "round {} timed out, aborting {} participants",
            round,
            participants.len()
        );
        let me = NodeAddress::monitor(self.host);
        for participant in participants {
            self.send(
                me,
                NodeAddress::scheduler(participant),
                me,
                me,
                NegotiationMessage::Abort { round },
            );
        }
        self.phase = Phase::Idle;
        self.env.stats.borrow_mut().rounds_aborted += 1;
        self.env.trace.borrow_mut().log(TraceEntry::RoundAborted {
            time: self.ctx.time(),
            node: self.host,
            round,
            reason: "timeout".to_string(),
        });
    }

    fn on_lease_expired(&mut self, round: RoundId) {
        if let Phase::Participant { round: current, .. } = self.phase {
            if current == round {
                log_warn!(self.ctx, "no word from initiator of round {}, leaving it", round);
                self.phase = Phase::Idle;
            }
        }
    }

    fn on_commit_timeout(&mut self, round: RoundId) {
        if let Phase::Committing {
            round: current,
            pending,
            ..
        } = &self.phase
        {
            if *current == round {
                log_warn!(self.ctx, "round {}: {} acks missing", round, pending.len());
                self.phase = Phase::Idle;
            }
        }
    }

    fn on_check_overload(&mut self) {
        if self.env.shutdown.is_triggered() {
            return;
        }
        self.check_local_overload();
        self.ctx.emit_self(CheckOverload {}, self.settings.check_period);
    }

    fn on_heartbeat(&mut self) {
        if self.env.shutdown.is_triggered() {
            return;
        }
        self.env.membership.borrow_mut().heartbeat(self.host, self.ctx.time());
        self.ctx.emit_self(Heartbeat {}, self.settings.heartbeat_period);
    }
}

impl EventHandler for ActorNode {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            MessageDelivered { envelope } => {
                self.on_message_delivered(envelope);
            }
            CheckOverload {} => {
                self.on_check_overload();
            }
            Heartbeat {} => {
                self.on_heartbeat();
            }
            RoundTimeout { round } => {
                self.on_round_timeout(round);
            }
            LeaseExpired { round } => {
                self.on_lease_expired(round);
            }
            CommitTimeout { round } => {
                self.on_commit_timeout(round);
            }
        })
    }
}
