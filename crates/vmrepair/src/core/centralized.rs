//! Periodic centralized repair.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use vmrepair_core::{cast, log_debug, log_info, log_warn, Event, EventHandler, SimulationContext};

use crate::core::common::ShutdownSignal;
use crate::core::executor::MigrationExecutor;
use crate::core::planner::{CentralizedRepairPlanner, SchedulerResult};
use crate::core::resource::ClusterState;
use crate::core::stats::SchedulingStats;
use crate::trace::{TraceEntry, TraceLog};

#[derive(Clone, Serialize)]
pub struct PlanningEpoch {}

/// Scheduler which plans the repair of the whole cluster every `period`.
///
/// Each epoch is handled inside a single event, so no other component changes the cluster while the plan
/// is computed and applied.
pub struct CentralizedScheduler {
    planner: CentralizedRepairPlanner,
    cluster: Rc<RefCell<ClusterState>>,
    executor: Box<dyn MigrationExecutor>,
    stats: Rc<RefCell<SchedulingStats>>,
    trace: Rc<RefCell<TraceLog>>,
    shutdown: ShutdownSignal,
    period: f64,
    ctx: SimulationContext,
}

impl CentralizedScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: CentralizedRepairPlanner,
        cluster: Rc<RefCell<ClusterState>>,
        executor: Box<dyn MigrationExecutor>,
        stats: Rc<RefCell<SchedulingStats>>,
        trace: Rc<RefCell<TraceLog>>,
        shutdown: ShutdownSignal,
        period: f64,
        ctx: SimulationContext,
    ) -> Self {
        Self {
            planner,
            cluster,
            executor,
            stats,
            trace,
            shutdown,
            period,
            ctx,
        }
    }

    pub fn start(&mut self) {
        log_debug!(
            self.ctx,
            "planning every {} with {:?} evacuation",
            self.period,
            self.planner.strategy()
        );
        self.ctx.emit_self(PlanningEpoch {}, self.period);
    }

    /// Plans the repair of the current cluster state and applies the plan if it is viable.
    pub fn run_epoch(&mut self) -> SchedulerResult {
        let hosts = self.cluster.borrow().snapshot();
        let result = self.planner.plan_repair(&hosts);
        let overloaded = hosts.iter().filter(|h| h.is_overloaded()).count();
        self.stats.borrow_mut().planning_epochs += 1;
        self.trace.borrow_mut().log(TraceEntry::PlanComputed {
            time: self.ctx.time(),
            state: result.state,
            overloaded,
            migrations: result.migrations.clone(),
        });

        if result.is_viable() {
            if result.migration_count > 0 {
                log_info!(
                    self.ctx,
                    "repairing {} overloaded hosts with {} migrations",
                    overloaded,
                    result.migration_count
                );
            } else {
                log_debug!(self.ctx, "no overloaded hosts");
            }
            for action in result.migrations.iter() {
                self.executor.relocate(action);
            }
        } else {
            log_warn!(self.ctx, "no viable configuration for {} overloaded hosts", overloaded);
            self.stats.borrow_mut().infeasible_plans += 1;
        }
        result
    }

    fn on_epoch(&mut self) {
        if self.shutdown.is_triggered() {
            return;
        }
        self.run_epoch();
        self.ctx.emit_self(PlanningEpoch {}, self.period);
    }
}

impl EventHandler for CentralizedScheduler {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            PlanningEpoch {} => {
                self.on_epoch();
            }
        })
    }
}
