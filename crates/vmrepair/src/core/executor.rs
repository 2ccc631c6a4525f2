//! Application of migration intents.

use std::cell::RefCell;
use std::rc::Rc;

use vmrepair_core::{log_debug, log_warn, SimulationContext};

use crate::core::common::MigrationAction;
use crate::core::resource::ClusterState;
use crate::core::stats::SchedulingStats;
use crate::trace::{TraceEntry, TraceLog};

/// Applies migration intents produced by planners.
///
/// Fire-and-forget: callers observe the outcome only through later resource snapshots.
pub trait MigrationExecutor {
    fn relocate(&mut self, action: &MigrationAction);
}

/// Executor that moves VMs in the shared cluster state immediately.
///
/// Intents that no longer match the cluster (the VM has already left the source host) are logged and skipped.
pub struct ClusterExecutor {
    cluster: Rc<RefCell<ClusterState>>,
    stats: Rc<RefCell<SchedulingStats>>,
    trace: Rc<RefCell<TraceLog>>,
    ctx: SimulationContext,
}

impl ClusterExecutor {
    pub fn new(
        cluster: Rc<RefCell<ClusterState>>,
        stats: Rc<RefCell<SchedulingStats>>,
        trace: Rc<RefCell<TraceLog>>,
        ctx: SimulationContext,
    ) -> Self {
        Self {
            cluster,
            stats,
            trace,
            ctx,
        }
    }
}

impl MigrationExecutor for ClusterExecutor {
    fn relocate(&mut self, action: &MigrationAction) {
        let result = self
            .cluster
            .borrow_mut()
            .migrate(action.vm, action.source, action.destination);
        match result {
            Ok(()) => {
                log_debug!(self.ctx, "migrated {}", action);
                self.stats.borrow_mut().migrations += 1;
                self.trace.borrow_mut().log(TraceEntry::MigrationApplied {
                    time: self.ctx.time(),
                    action: *action,
                });
            }
            Err(e) => {
                log_warn!(self.ctx, "skipped migration {}: {}", action, e);
                self.stats.borrow_mut().stale_migrations += 1;
                self.trace.borrow_mut().log(TraceEntry::MigrationRejected {
                    time: self.ctx.time(),
                    action: *action,
                    reason: e.to_string(),
                });
            }
        }
    }
}

