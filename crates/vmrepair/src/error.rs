//! Error types.

use thiserror::Error;

use crate::core::common::{HostId, VmId};

/// Errors raised while loading or validating the simulation config.
///
/// These are fatal: the run is not started with an invalid config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("can't parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value of {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors raised by resource model mutations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("unknown host {0}")]
    UnknownHost(HostId),
    #[error("unknown vm {0}")]
    UnknownVm(VmId),
    #[error("vm {vm} is not running on host {host}")]
    VmNotOnHost { vm: VmId, host: HostId },
    #[error("invalid cpu demand {0}")]
    InvalidDemand(f64),
}

/// Errors raised while handling a single negotiation message.
///
/// The node logs them and moves on to the next message in its mailbox.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed {tip} message: {source}")]
    MalformedMessage {
        tip: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("message type {declared} does not match payload {actual}")]
    KindMismatch { declared: String, actual: &'static str },
    #[error("unknown message type {0}")]
    UnknownKind(String),
    #[error("{tip} message can't be delivered to {role} mailbox")]
    UnexpectedMessage { tip: &'static str, role: String },
    #[error("can't encode {tip} message: {source}")]
    Encode {
        tip: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
