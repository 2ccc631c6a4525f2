//! Simulation configuration.

pub mod options;

use serde::{Deserialize, Serialize};

use crate::core::ordering::OrderingPolicy;
use crate::core::planner::EvacuationStrategy;
use crate::error::ConfigError;
use crate::negotiation::propagation::propagation_resolver;

/// Repair algorithm used in a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    Centralized,
    Decentralized,
}

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
struct RawSimulationConfig {
    pub seed: Option<u64>,
    pub duration: Option<f64>,
    pub load_period: Option<f64>,
    pub algorithm: Option<Algorithm>,
    pub hosts: Option<RawHostsConfig>,
    pub vms: Option<RawVmsConfig>,
    pub load: Option<RawLoadConfig>,
    pub planner: Option<RawPlannerConfig>,
    pub centralized: Option<RawCentralizedConfig>,
    pub negotiation: Option<RawNegotiationConfig>,
    pub membership: Option<RawMembershipConfig>,
    pub failures: Option<RawFailuresConfig>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
struct RawHostsConfig {
    pub count: Option<u32>,
    pub cpu_capacity: Option<f64>,
    pub name_prefix: Option<String>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
struct RawVmsConfig {
    pub count: Option<u32>,
    pub max_cpu_consumption: Option<f64>,
    pub cpu_consumption_slots: Option<u32>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
struct RawLoadConfig {
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
struct RawPlannerConfig {
    pub evacuation: Option<EvacuationStrategy>,
    pub use_load: Option<bool>,
    pub load_weight: Option<f64>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
struct RawCentralizedConfig {
    pub planning_period: Option<f64>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
struct RawNegotiationConfig {
    pub check_period: Option<f64>,
    pub round_timeout: Option<f64>,
    pub max_hops: Option<u32>,
    pub propagation: Option<String>,
    pub participant_lease: Option<f64>,
    pub message_delay: Option<f64>,
    pub max_message_delay: Option<f64>,
    pub drop_rate: Option<f64>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
struct RawMembershipConfig {
    pub heartbeat_period: Option<f64>,
    pub heartbeat_timeout: Option<f64>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
struct RawFailuresConfig {
    pub crash_period: Option<f64>,
    pub crash_duration: Option<f64>,
}

/// Set of identical hosts.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostsConfig {
    pub count: u32,
    pub cpu_capacity: f64,
    /// Host names are produced by appending the host number to the prefix.
    pub name_prefix: String,
}

/// VMs placed round-robin on hosts at startup.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct VmsConfig {
    pub count: u32,
    pub max_cpu_consumption: f64,
    /// Number of discrete demand levels between zero and the maximum consumption.
    pub cpu_consumption_slots: u32,
}

/// Parameters of the normal load distribution, in percent of VM maximum consumption.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct LoadConfig {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct PlannerConfig {
    pub evacuation: EvacuationStrategy,
    pub use_load: bool,
    pub load_weight: f64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct CentralizedConfig {
    pub planning_period: f64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct NegotiationConfig {
    /// Period of local overload checks on each node.
    pub check_period: f64,
    /// Time the initiator waits for a sufficient coalition, also used as the commit timeout.
    pub round_timeout: f64,
    /// How many times a resource request may be relayed.
    pub max_hops: u32,
    /// Propagation strategy, `Ring` or `Random`, optionally with `[fanout=N]`.
    pub propagation: String,
    /// Time after which a silent participant returns to idle.
    pub participant_lease: f64,
    /// Lower bound of the message delay.
    pub message_delay: f64,
    /// Upper bound of the message delay, delays are uniform between the bounds.
    pub max_message_delay: f64,
    /// Probability that a message is lost.
    pub drop_rate: f64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct MembershipConfig {
    pub heartbeat_period: f64,
    pub heartbeat_timeout: f64,
}

/// Periodic host crashes: every `crash_period` a random running host crashes and recovers after
/// `crash_duration`.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct FailuresConfig {
    pub crash_period: f64,
    pub crash_duration: f64,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Length of the run in seconds.
    pub duration: f64,
    /// Period of VM demand changes.
    pub load_period: f64,
    pub algorithm: Algorithm,
    pub hosts: HostsConfig,
    pub vms: VmsConfig,
    pub load: LoadConfig,
    pub planner: PlannerConfig,
    pub centralized: CentralizedConfig,
    pub negotiation: NegotiationConfig,
    pub membership: MembershipConfig,
    pub failures: FailuresConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::from_raw(RawSimulationConfig::default())
    }
}

impl SimulationConfig {
    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        Self::from_yaml(&data)
    }

    /// Parses and validates the config from YAML string.
    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        let raw: RawSimulationConfig = serde_yaml::from_str(data)?;
        let config = Self::from_raw(raw);
        config.validate()?;
        Ok(config)
    }

    fn from_raw(raw: RawSimulationConfig) -> Self {
        let hosts = raw.hosts.unwrap_or_default();
        let vms = raw.vms.unwrap_or_default();
        let load = raw.load.unwrap_or_default();
        let planner = raw.planner.unwrap_or_default();
        let centralized = raw.centralized.unwrap_or_default();
        let negotiation = raw.negotiation.unwrap_or_default();
        let membership = raw.membership.unwrap_or_default();
        let failures = raw.failures.unwrap_or_default();

        let host_count = hosts.count.unwrap_or(50);
        let message_delay = negotiation.message_delay.unwrap_or(0.1);
        let round_timeout = negotiation
            .round_timeout
            .unwrap_or_else(|| f64::max(1., (host_count / 4) as f64));

        Self {
            seed: raw.seed.unwrap_or(23),
            duration: raw.duration.unwrap_or(1800.),
            load_period: raw.load_period.unwrap_or(180.),
            algorithm: raw.algorithm.unwrap_or_default(),
            hosts: HostsConfig {
                count: host_count,
                cpu_capacity: hosts.cpu_capacity.unwrap_or(8000.),
                name_prefix: hosts.name_prefix.unwrap_or_else(|| "node".to_string()),
            },
            vms: VmsConfig {
                count: vms.count.unwrap_or(200),
                max_cpu_consumption: vms.max_cpu_consumption.unwrap_or(2000.),
                cpu_consumption_slots: vms.cpu_consumption_slots.unwrap_or(2),
            },
            load: LoadConfig {
                mean: load.mean.unwrap_or(50.),
                std: load.std.unwrap_or(50.),
            },
            planner: PlannerConfig {
                evacuation: planner.evacuation.unwrap_or_default(),
                use_load: planner.use_load.unwrap_or(false),
                load_weight: planner.load_weight.unwrap_or(0.5),
            },
            centralized: CentralizedConfig {
                planning_period: centralized.planning_period.unwrap_or(30.),
            },
            negotiation: NegotiationConfig {
                check_period: negotiation.check_period.unwrap_or(10.),
                round_timeout,
                max_hops: negotiation.max_hops.unwrap_or(4),
                propagation: negotiation.propagation.unwrap_or_else(|| "Ring".to_string()),
                participant_lease: negotiation.participant_lease.unwrap_or(2. * round_timeout),
                message_delay,
                max_message_delay: negotiation.max_message_delay.unwrap_or(message_delay),
                drop_rate: negotiation.drop_rate.unwrap_or(0.),
            },
            membership: MembershipConfig {
                heartbeat_period: membership.heartbeat_period.unwrap_or(5.),
                heartbeat_timeout: membership.heartbeat_timeout.unwrap_or(15.),
            },
            failures: FailuresConfig {
                // a week, so that crashes stay rare in runs of default length
                crash_period: failures.crash_period.unwrap_or(604800.),
                crash_duration: failures.crash_duration.unwrap_or(300.),
            },
        }
    }

    /// Checks that all values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("duration", self.duration)?;
        positive("load_period", self.load_period)?;
        positive("hosts.cpu_capacity", self.hosts.cpu_capacity)?;
        positive("vms.max_cpu_consumption", self.vms.max_cpu_consumption)?;
        positive("centralized.planning_period", self.centralized.planning_period)?;
        positive("negotiation.check_period", self.negotiation.check_period)?;
        positive("negotiation.round_timeout", self.negotiation.round_timeout)?;
        positive("negotiation.participant_lease", self.negotiation.participant_lease)?;
        positive("membership.heartbeat_period", self.membership.heartbeat_period)?;
        positive("membership.heartbeat_timeout", self.membership.heartbeat_timeout)?;
        positive("failures.crash_period", self.failures.crash_period)?;
        positive("failures.crash_duration", self.failures.crash_duration)?;
        if self.hosts.count == 0 {
            return Err(invalid("hosts.count", "at least one host is required"));
        }
        if self.vms.cpu_consumption_slots == 0 {
            return Err(invalid("vms.cpu_consumption_slots", "at least one slot is required"));
        }
        if !(0. ..=1.).contains(&self.planner.load_weight) {
            return Err(invalid("planner.load_weight", "must be within [0, 1]"));
        }
        if !(self.load.std >= 0.) {
            return Err(invalid("load.std", "must be non-negative"));
        }
        if !(self.negotiation.message_delay >= 0.) {
            return Err(invalid("negotiation.message_delay", "must be non-negative"));
        }
        if !(self.negotiation.max_message_delay >= self.negotiation.message_delay) {
            return Err(invalid("negotiation.max_message_delay", "must not be below message_delay"));
        }
        if !(0. ..=1.).contains(&self.negotiation.drop_rate) {
            return Err(invalid("negotiation.drop_rate", "must be within [0, 1]"));
        }
        propagation_resolver(&self.negotiation.propagation).map(|_| ())
    }

    pub fn ordering_policy(&self) -> OrderingPolicy {
        OrderingPolicy::new(self.planner.use_load, self.planner.load_weight)
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0. {
        Ok(())
    } else {
        Err(invalid(key, &format!("must be positive, got {}", value)))
    }
}
