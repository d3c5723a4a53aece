//! Application services: strategies, registry, orchestration and request flow.

pub mod classifier;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod registry;
pub mod strategy;
