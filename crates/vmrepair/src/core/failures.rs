//! Periodic host crashes.

use std::collections::BTreeMap;

use vmrepair_core::SimulationContext;

use crate::core::common::HostId;
use crate::core::config::FailuresConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureAction {
    Crash(HostId),
    Recover(HostId),
}

/// Schedule of host crashes.
///
/// Every `crash_period` one of the running hosts, chosen with the simulation generator, crashes and
/// recovers `crash_duration` later. The injector only decides what happens and when, the caller applies
/// the actions.
pub struct CrashInjector {
    period: f64,
    duration: f64,
    next_crash: f64,
    recoveries: BTreeMap<HostId, f64>,
}

impl CrashInjector {
    pub fn new(config: &FailuresConfig, start_time: f64) -> Self {
        Self {
            period: config.crash_period,
            duration: config.crash_duration,
            next_crash: start_time + config.crash_period,
            recoveries: BTreeMap::new(),
        }
    }

    /// Time of the next crash or recovery.
    pub fn next_time(&self) -> f64 {
        self.recoveries.values().copied().fold(self.next_crash, f64::min)
    }

    pub fn crashed_hosts(&self) -> Vec<HostId> {
        self.recoveries.keys().copied().collect()
    }

    /// Returns actions due at `now`: recoveries first, then at most one crash among `hosts`.
    pub fn fire(&mut self, now: f64, hosts: &[HostId], ctx: &mut SimulationContext) -> Vec<FailureAction> {
        let mut actions: Vec<FailureAction> = Vec::new();
        let recovered: Vec<HostId> = self
            .recoveries
            .iter()
            .filter(|(_, time)| **time <= now)
            .map(|(host, _)| *host)
            .collect();
        for host in recovered {
            self.recoveries.remove(&host);
            actions.push(FailureAction::Recover(host));
        }

        if self.next_crash <= now {
            let running: Vec<HostId> = hosts
                .iter()
                .filter(|h| !self.recoveries.contains_key(*h))
                .copied()
                .collect();
            if !running.is_empty() {
                let host = running[ctx.gen_range(0..running.len())];
                self.recoveries.insert(host, now + self.duration);
                actions.push(FailureAction::Crash(host));
            }
            self.next_crash += self.period;
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use vmrepair_core::Simulation;

    use super::*;

    fn injector(period: f64, duration: f64) -> CrashInjector {
        CrashInjector::new(
            &FailuresConfig {
                crash_period: period,
                crash_duration: duration,
            },
            0.,
        )
    }

    #[test]
    fn crash_then_recover() {
        let mut sim = Simulation::new(1);
        let mut ctx = sim.create_context("failures");
        let hosts = vec![HostId(0), HostId(1), HostId(2)];
        let mut injector = injector(100., 30.);
        assert_eq!(injector.next_time(), 100.);

        let actions = injector.fire(100., &hosts, &mut ctx);
        assert_eq!(actions.len(), 1);
        let crashed = match actions[0] {
            FailureAction::Crash(host) => host,
            FailureAction::Recover(_) => panic!("expected crash"),
        };
        assert_eq!(injector.crashed_hosts(), vec![crashed]);
        assert_eq!(injector.next_time(), 130.);

        assert_eq!(injector.fire(130., &hosts, &mut ctx), vec![FailureAction::Recover(crashed)]);
        assert!(injector.crashed_hosts().is_empty());
        assert_eq!(injector.next_time(), 200.);
    }

    #[test]
    fn crashed_host_is_not_chosen_again() {
        let mut sim = Simulation::new(1);
        let mut ctx = sim.create_context("failures");
        let hosts = vec![HostId(0), HostId(1)];
        let mut injector = injector(10., 100.);

        injector.fire(10., &hosts, &mut ctx);
        injector.fire(20., &hosts, &mut ctx);
        let mut crashed = injector.crashed_hosts();
        crashed.sort();
        assert_eq!(crashed, hosts);
        // nothing left to crash
        assert!(injector.fire(30., &hosts, &mut ctx).is_empty());
    }
}
