//! Infrastructure adapters and runtime bootstrap.

pub mod assets;
pub mod engine;
pub mod error;
pub mod http;
pub mod reasoning;
pub mod storage;
pub mod synthesis;
pub mod telemetry;
