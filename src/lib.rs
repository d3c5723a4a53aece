//! Course visual asset generation: classify content, then render charts, formulas,
//! slides, concept images and infographics through one shared headless engine.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
