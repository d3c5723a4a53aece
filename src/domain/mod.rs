//! Domain layer types and invariants.

pub mod blueprint;
pub mod chart;
pub mod error;
pub mod generation;
pub mod task;
