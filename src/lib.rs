// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod connectors;
pub mod dataset;
pub mod geocoding;
pub mod ingest;
pub mod metrics;
pub mod queue;
pub mod store;

pub use crate::api::create_router;
pub use crate::config::EngineConfig;
