//! Decentralized repair: hosts negotiate coalitions by exchanging messages.

pub mod address;
pub mod coalition;
pub mod message;
pub mod network;
pub mod node;
pub mod propagation;
