use serde::Serialize;

/// Counters collected over a simulation run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SchedulingStats {
    pub planning_epochs: u64,
    pub infeasible_plans: u64,
    pub rounds_started: u64,
    pub rounds_committed: u64,
    pub rounds_aborted: u64,
    pub rounds_completed: u64,
    pub busy_replies: u64,
    pub migrations: u64,
    pub stale_migrations: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub malformed_messages: u64,
    /// Pairs of (time, number of overloaded hosts) sampled after each load change.
    pub overload_samples: Vec<(f64, usize)>,
}

impl SchedulingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_overload(&mut self, time: f64, overloaded: usize) {
        self.overload_samples.push((time, overloaded));
    }

    /// Average number of overloaded hosts over all samples.
    pub fn mean_overloaded_hosts(&self) -> f64 {
        if self.overload_samples.is_empty() {
            return 0.;
        }
        let total: usize = self.overload_samples.iter().map(|(_, count)| count).sum();
        total as f64 / self.overload_samples.len() as f64
    }
}
