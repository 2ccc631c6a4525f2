#![doc = include_str!("../readme.md")]

pub mod core;
pub mod error;
pub mod negotiation;
pub mod simulation;
pub mod trace;
