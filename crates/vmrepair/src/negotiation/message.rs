//! Protocol messages and their wire encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::common::{HostId, MigrationAction};
use crate::core::resource::HostSnapshot;
use crate::error::ProtocolError;
use crate::negotiation::address::{NodeAddress, Role};

/// Wire message: type name plus JSON payload.
#[derive(Serialize, Clone, PartialEq)]
pub struct Message {
    pub tip: String,
    pub data: String,
}

impl Message {
    pub fn new<T>(tip: T, data: T) -> Self
    where
        T: Into<String>,
    {
        Self {
            tip: tip.into(),
            data: data.into(),
        }
    }

    /// Creates a message with JSON serialized payload.
    pub fn json<T, S>(tip: T, data: &S) -> Result<Self, serde_json::Error>
    where
        T: Into<String>,
        S: Serialize,
    {
        Ok(Self {
            tip: tip.into(),
            data: serde_json::to_string(data)?,
        })
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tip, self.data)
    }
}

/// Identifies a negotiation round: the initiator plus its local round counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundId {
    pub initiator: HostId,
    pub seq: u64,
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.initiator, self.seq)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NegotiationMessage {
    /// Asks for spare capacity. `collected` is the positive slack offered along the relay chain so far.
    ResourceRequest {
        round: RoundId,
        excess: f64,
        collected: f64,
        hops_left: u32,
        visited: Vec<HostId>,
    },
    /// Reply to a request. `forwarded` tells the initiator that the request was relayed further.
    Offer {
        round: RoundId,
        slack: f64,
        host: HostSnapshot,
        forwarded: bool,
    },
    Busy {
        round: RoundId,
    },
    Commit {
        round: RoundId,
        migrations: Vec<MigrationAction>,
    },
    Ack {
        round: RoundId,
    },
    Abort {
        round: RoundId,
    },
}

impl NegotiationMessage {
    pub fn tip(&self) -> &'static str {
        match self {
            NegotiationMessage::ResourceRequest { .. } => "RESOURCE_REQUEST",
            NegotiationMessage::Offer { .. } => "OFFER",
            NegotiationMessage::Busy { .. } => "BUSY",
            NegotiationMessage::Commit { .. } => "COMMIT",
            NegotiationMessage::Ack { .. } => "ACK",
            NegotiationMessage::Abort { .. } => "ABORT",
        }
    }

    pub fn round(&self) -> RoundId {
        match self {
            NegotiationMessage::ResourceRequest { round, .. }
            | NegotiationMessage::Offer { round, .. }
            | NegotiationMessage::Busy { round }
            | NegotiationMessage::Commit { round, .. }
            | NegotiationMessage::Ack { round }
            | NegotiationMessage::Abort { round } => *round,
        }
    }

    /// Mailbox the message must be delivered to.
    pub fn mailbox(&self) -> Role {
        match self {
            NegotiationMessage::ResourceRequest { .. }
            | NegotiationMessage::Commit { .. }
            | NegotiationMessage::Abort { .. } => Role::Scheduler,
            NegotiationMessage::Offer { .. } | NegotiationMessage::Busy { .. } | NegotiationMessage::Ack { .. } => {
                Role::Monitor
            }
        }
    }

    pub fn encode(&self) -> Result<Message, ProtocolError> {
        Message::json(self.tip(), self).map_err(|source| ProtocolError::Encode { tip: self.tip(), source })
    }

    /// Decodes the payload and checks it against the declared message type.
    pub fn decode(msg: &Message) -> Result<Self, ProtocolError> {
        if !KNOWN_TIPS.contains(&msg.tip.as_str()) {
            return Err(ProtocolError::UnknownKind(msg.tip.clone()));
        }
        let decoded: NegotiationMessage =
            serde_json::from_str(&msg.data).map_err(|source| ProtocolError::MalformedMessage {
                tip: msg.tip.clone(),
                source,
            })?;
        if decoded.tip() != msg.tip {
            return Err(ProtocolError::KindMismatch {
                declared: msg.tip.clone(),
                actual: decoded.tip(),
            });
        }
        Ok(decoded)
    }
}

const KNOWN_TIPS: [&str; 6] = ["RESOURCE_REQUEST", "OFFER", "BUSY", "COMMIT", "ACK", "ABORT"];

/// Message in transit with its addressing.
///
/// `origin` and `reply_to` are carried unchanged through relays, so replies go straight back to the initiator.
#[derive(Clone, Debug, Serialize)]
pub struct Envelope {
    pub sender: NodeAddress,
    pub origin: NodeAddress,
    pub reply_to: NodeAddress,
    pub dest: NodeAddress,
    pub msg: Message,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::VmId;

    fn round() -> RoundId {
        RoundId {
            initiator: HostId(1),
            seq: 3,
        }
    }

    #[test]
    fn offer_survives_encoding() {
        let offer = NegotiationMessage::Offer {
            round: round(),
            slack: 3000.,
            host: HostSnapshot::new(HostId(2), 8000.).with_vm(VmId(4), 5000.),
            forwarded: false,
        };
        let msg = offer.encode().unwrap();
        assert_eq!(msg.tip, "OFFER");
        assert_eq!(NegotiationMessage::decode(&msg).unwrap(), offer);
    }

    #[test]
    fn unknown_tip_is_rejected() {
        let msg = Message::new("GOSSIP", "{}");
        assert!(matches!(
            NegotiationMessage::decode(&msg),
            Err(ProtocolError::UnknownKind(tip)) if tip == "GOSSIP"
        ));
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let msg = Message::new("COMMIT", "{\"Commit\": 42");
        assert!(matches!(
            NegotiationMessage::decode(&msg),
            Err(ProtocolError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn declared_type_must_match_payload() {
        let mut msg = NegotiationMessage::Ack { round: round() }.encode().unwrap();
        msg.tip = "ABORT".to_string();
        assert!(matches!(
            NegotiationMessage::decode(&msg),
            Err(ProtocolError::KindMismatch { actual: "ACK", .. })
        ));
    }

    #[test]
    fn replies_go_to_monitor_mailbox() {
        assert_eq!(NegotiationMessage::Busy { round: round() }.mailbox(), Role::Monitor);
        assert_eq!(NegotiationMessage::Abort { round: round() }.mailbox(), Role::Scheduler);
    }
}
