//! Choice of peers to ask for resources.

use vmrepair_core::SimulationContext;

use crate::core::common::HostId;
use crate::core::config::options::{parse_config_value, parse_options};
use crate::error::ConfigError;

/// Selects the hosts that receive the next resource request.
pub trait PropagationStrategy {
    /// Picks up to fanout hosts from `candidates` (ordered by id, never containing `me`).
    fn select(&self, me: HostId, candidates: &[HostId], ctx: &mut SimulationContext) -> Vec<HostId>;
}

/// Asks the hosts following the current one in the id ring.
pub struct RingPropagation {
    fanout: usize,
}

impl RingPropagation {
    pub fn new(fanout: usize) -> Self {
        Self { fanout }
    }
}

impl PropagationStrategy for RingPropagation {
    fn select(&self, me: HostId, candidates: &[HostId], _ctx: &mut SimulationContext) -> Vec<HostId> {
        let after = candidates.iter().filter(|h| **h > me);
        let before = candidates.iter().filter(|h| **h < me);
        after.chain(before).take(self.fanout).copied().collect()
    }
}

/// Asks hosts chosen uniformly at random with the simulation generator.
pub struct RandomPropagation {
    fanout: usize,
}

impl RandomPropagation {
    pub fn new(fanout: usize) -> Self {
        Self { fanout }
    }
}

impl PropagationStrategy for RandomPropagation {
    fn select(&self, me: HostId, candidates: &[HostId], ctx: &mut SimulationContext) -> Vec<HostId> {
        let mut pool: Vec<HostId> = candidates.iter().filter(|h| **h != me).copied().collect();
        let mut selected = Vec::new();
        while selected.len() < self.fanout && !pool.is_empty() {
            let idx = ctx.gen_range(0..pool.len());
            selected.push(pool.remove(idx));
        }
        selected
    }
}

/// Creates the strategy from config value such as `Ring` or `Random[fanout=2]`.
pub fn propagation_resolver(config_str: &str) -> Result<Box<dyn PropagationStrategy>, ConfigError> {
    let (name, options) = parse_config_value(config_str);
    let options = options.map(|s| parse_options(&s)).unwrap_or_default();
    let fanout = match options.get("fanout") {
        Some(value) => value.parse::<usize>().map_err(|e| ConfigError::Invalid {
            key: "negotiation.propagation",
            reason: format!("bad fanout {}: {}", value, e),
        })?,
        None => 1,
    };
    if fanout == 0 {
        return Err(ConfigError::Invalid {
            key: "negotiation.propagation",
            reason: "fanout must be positive".to_string(),
        });
    }
    match name.as_str() {
        "Ring" => Ok(Box::new(RingPropagation::new(fanout))),
        "Random" => Ok(Box::new(RandomPropagation::new(fanout))),
        _ => Err(ConfigError::Invalid {
            key: "negotiation.propagation",
            reason: format!("unsupported propagation strategy {}", name),
        }),
    }
}

#[cfg(test)]
mod tests {
    use vmrepair_core::Simulation;

    use super::*;

    fn hosts(ids: &[u32]) -> Vec<HostId> {
        ids.iter().map(|id| HostId(*id)).collect()
    }

    #[test]
    fn ring_wraps_around() {
        let mut sim = Simulation::new(1);
        let mut ctx = sim.create_context("test");
        let ring = RingPropagation::new(2);
        assert_eq!(ring.select(HostId(3), &hosts(&[0, 1, 4]), &mut ctx), hosts(&[4, 0]));
        assert_eq!(ring.select(HostId(4), &hosts(&[0, 1, 3]), &mut ctx), hosts(&[0, 1]));
        assert!(ring.select(HostId(0), &[], &mut ctx).is_empty());
    }

    #[test]
    fn random_picks_distinct_hosts() {
        let mut sim = Simulation::new(1);
        let mut ctx = sim.create_context("test");
        let random = RandomPropagation::new(3);
        let mut selected = random.select(HostId(0), &hosts(&[1, 2, 3, 4, 5]), &mut ctx);
        assert_eq!(selected.len(), 3);
        selected.sort();
        selected.dedup();
        assert_eq!(selected.len(), 3);
        assert!(!selected.contains(&HostId(0)));
    }

    #[test]
    fn resolver_parses_fanout() {
        let mut sim = Simulation::new(1);
        let mut ctx = sim.create_context("test");
        let strategy = propagation_resolver("Ring[fanout=2]").unwrap();
        assert_eq!(strategy.select(HostId(0), &hosts(&[1, 2, 3]), &mut ctx).len(), 2);
        assert!(propagation_resolver("Random").is_ok());
        assert!(propagation_resolver("Ring[fanout=0]").is_err());
        assert!(propagation_resolver("Flood").is_err());
    }
}
