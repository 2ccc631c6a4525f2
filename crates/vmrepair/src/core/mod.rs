pub mod centralized;
pub mod common;
pub mod config;
pub mod executor;
pub mod failures;
pub mod load_model;
pub mod membership;
pub mod ordering;
pub mod overload;
pub mod planner;
pub mod resource;
pub mod stats;
