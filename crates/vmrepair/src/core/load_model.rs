//! Periodic change of VM demands.

use std::cell::RefCell;
use std::rc::Rc;

use rand_distr::Normal;
use serde::Serialize;

use vmrepair_core::{cast, log_debug, log_warn, Event, EventHandler, SimulationContext};

use crate::core::config::{LoadConfig, VmsConfig};
use crate::core::common::ShutdownSignal;
use crate::core::overload::OverloadDetector;
use crate::core::resource::ClusterState;
use crate::core::stats::SchedulingStats;
use crate::error::ConfigError;

#[derive(Clone, Serialize)]
pub struct ChangeLoad {}

/// Every `period` draws a new demand for each VM from a normal distribution.
///
/// The sample is expressed in percent of the VM maximum consumption, clamped to [0, 100]
/// and rounded to the nearest of `cpu_consumption_slots` levels.
pub struct LoadInjector {
    cluster: Rc<RefCell<ClusterState>>,
    stats: Rc<RefCell<SchedulingStats>>,
    shutdown: ShutdownSignal,
    detector: OverloadDetector,
    distribution: Normal<f64>,
    max_cpu_consumption: f64,
    slots: u32,
    period: f64,
    ctx: SimulationContext,
}

impl LoadInjector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cluster: Rc<RefCell<ClusterState>>,
        stats: Rc<RefCell<SchedulingStats>>,
        shutdown: ShutdownSignal,
        detector: OverloadDetector,
        load: &LoadConfig,
        vms: &VmsConfig,
        period: f64,
        ctx: SimulationContext,
    ) -> Result<Self, ConfigError> {
        let distribution = Normal::new(load.mean, load.std).map_err(|e| ConfigError::Invalid {
            key: "load.std",
            reason: e.to_string(),
        })?;
        Ok(Self {
            cluster,
            stats,
            shutdown,
            detector,
            distribution,
            max_cpu_consumption: vms.max_cpu_consumption,
            slots: vms.cpu_consumption_slots.max(1),
            period,
            ctx,
        })
    }

    pub fn start(&mut self) {
        self.ctx.emit_self_now(ChangeLoad {});
    }

    /// Converts a load sample in percent into CPU demand.
    pub fn quantize(&self, percent: f64) -> f64 {
        let share = (percent / 100.).clamp(0., 1.);
        let slots = self.slots as f64;
        (share * slots).round() / slots * self.max_cpu_consumption
    }

    fn change_load(&mut self) {
        if self.shutdown.is_triggered() {
            return;
        }
        let vm_ids = self.cluster.borrow().vm_ids();
        for vm_id in vm_ids {
            let sample = self.ctx.sample_from_distribution(&self.distribution);
            let demand = self.quantize(sample);
            if let Err(e) = self.cluster.borrow_mut().set_vm_demand(vm_id, demand) {
                log_warn!(self.ctx, "can't update demand of {}: {}", vm_id, e);
            }
        }
        let overloaded = self.detector.detect(&*self.cluster.borrow()).len();
        log_debug!(self.ctx, "load changed, {} hosts overloaded", overloaded);
        self.stats.borrow_mut().record_overload(self.ctx.time(), overloaded);
        self.ctx.emit_self(ChangeLoad {}, self.period);
    }
}

impl EventHandler for LoadInjector {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            ChangeLoad {} => {
                self.change_load();
            }
        })
    }
}
