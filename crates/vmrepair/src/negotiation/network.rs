//! Message delivery between nodes.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use serde::Serialize;

use vmrepair_core::{log_debug, Id, SimulationContext};

use crate::core::common::HostId;
use crate::core::stats::SchedulingStats;
use crate::negotiation::message::Envelope;
use crate::trace::{TraceEntry, TraceLog};

#[derive(Clone, Serialize)]
pub struct MessageDelivered {
    pub envelope: Envelope,
}

/// Delivers envelopes with random delay, keeping FIFO order on every link.
///
/// Messages to crashed hosts, over disabled links or lost due to `drop_rate` are logged and dropped,
/// messages from crashed hosts are discarded.
pub struct Network {
    min_delay: f64,
    max_delay: f64,
    drop_rate: f64,
    node_ids: BTreeMap<HostId, Id>,
    crashed_nodes: BTreeSet<HostId>,
    disabled_links: BTreeSet<(HostId, HostId)>,
    last_delivery: HashMap<(HostId, HostId), f64>,
    stats: Rc<RefCell<SchedulingStats>>,
    trace: Rc<RefCell<TraceLog>>,
    ctx: SimulationContext,
}

impl Network {
    pub fn new(stats: Rc<RefCell<SchedulingStats>>, trace: Rc<RefCell<TraceLog>>, ctx: SimulationContext) -> Self {
        Self {
            min_delay: 0.1,
            max_delay: 0.1,
            drop_rate: 0.,
            node_ids: BTreeMap::new(),
            crashed_nodes: BTreeSet::new(),
            disabled_links: BTreeSet::new(),
            last_delivery: HashMap::new(),
            stats,
            trace,
            ctx,
        }
    }

    pub fn add_node(&mut self, host: HostId, id: Id) {
        self.node_ids.insert(host, id);
    }

    pub fn set_delays(&mut self, min_delay: f64, max_delay: f64) {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
    }

    pub fn set_drop_rate(&mut self, drop_rate: f64) {
        self.drop_rate = drop_rate;
    }

    pub fn node_crashed(&mut self, host: HostId) {
        self.crashed_nodes.insert(host);
    }

    pub fn node_recovered(&mut self, host: HostId) {
        self.crashed_nodes.remove(&host);
    }

    pub fn is_crashed(&self, host: HostId) -> bool {
        self.crashed_nodes.contains(&host)
    }

    pub fn disable_link(&mut self, from: HostId, to: HostId) {
        self.disabled_links.insert((from, to));
    }

    pub fn enable_link(&mut self, from: HostId, to: HostId) {
        self.disabled_links.remove(&(from, to));
    }

    /// Disables links between every pair of hosts from different groups.
    pub fn make_partition(&mut self, group1: &[HostId], group2: &[HostId]) {
        for n1 in group1 {
            for n2 in group2 {
                self.disabled_links.insert((*n1, *n2));
                self.disabled_links.insert((*n2, *n1));
            }
        }
    }

    /// Enables all links again.
    pub fn reset_network(&mut self) {
        self.disabled_links.clear();
    }

    pub fn send(&mut self, envelope: Envelope) {
        let src = envelope.sender.host;
        let dst = envelope.dest.host;
        if self.crashed_nodes.contains(&src) {
            log_debug!(self.ctx, "discarded message from crashed {}: {:?}", src, envelope.msg);
            return;
        }
        self.stats.borrow_mut().messages_sent += 1;

        let reachable = !self.crashed_nodes.contains(&dst) && !self.disabled_links.contains(&(src, dst));
        let dest_id = match self.node_ids.get(&dst).copied() {
            Some(id) if reachable => id,
            _ => {
                self.drop(&envelope);
                return;
            }
        };
        if self.drop_rate > 0. && self.ctx.rand() < self.drop_rate {
            self.drop(&envelope);
            return;
        }

        let now = self.ctx.time();
        let delay = if self.max_delay > self.min_delay {
            self.min_delay + self.ctx.rand() * (self.max_delay - self.min_delay)
        } else {
            self.min_delay
        };
        let last = self.last_delivery.entry((src, dst)).or_insert(0.);
        let delivery_time = f64::max(now + delay, *last);
        *last = delivery_time;
        self.ctx.emit(MessageDelivered { envelope }, dest_id, delivery_time - now);
    }

    fn drop(&mut self, envelope: &Envelope) {
        log_debug!(
            self.ctx,
            "{} --x {} {:?} <-- message dropped",
            envelope.sender,
            envelope.dest,
            envelope.msg
        );
        self.stats.borrow_mut().messages_dropped += 1;
        self.trace.borrow_mut().log(TraceEntry::MessageDropped {
            time: self.ctx.time(),
            src: envelope.sender.to_string(),
            dst: envelope.dest.to_string(),
            tip: envelope.msg.tip.clone(),
        });
    }
}
