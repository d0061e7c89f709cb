// src/ingest/mod.rs
//! Ingestion pipeline glue: schedule reconciliation, job production,
//! persistence policy and the job worker.

pub mod bootstrap;
pub mod orchestrator;
pub mod persistence;
pub mod producer;
pub mod reconcile;
pub mod worker;

pub use bootstrap::bootstrap_connectors;
pub use orchestrator::{IngestOrchestrator, ReconcileReport};
pub use persistence::{IngestPersistence, PersistOutcome};
pub use producer::{IngestProducer, PruneReport};
pub use reconcile::{reconcile, DesiredSchedule, ScheduleDiff};
pub use worker::{IngestWorker, JobRun, WorkerError};
