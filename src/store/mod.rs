// src/store/mod.rs
//! Persisted model: sources, immutable snapshots and their records.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::connectors::{ConnectorMetadata, NormalizedRecord};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("source not found: {0}")]
    SourceNotFound(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One row per connector id; mirrors the latest connector metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub kind: String,
    pub homepage: Option<String>,
    pub schedule: Option<String>,
    pub enabled: bool,
    pub last_revision: Option<String>,
    pub last_ingested_at: Option<DateTime<Utc>>,
    pub total_records: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn from_metadata(meta: &ConnectorMetadata, now: DateTime<Utc>) -> Self {
        Self {
            key: meta.id.clone(),
            title: meta.title.clone(),
            description: meta.description.clone(),
            kind: meta.kind.as_str().to_string(),
            homepage: meta.homepage.clone(),
            schedule: Some(meta.schedule.clone()),
            enabled: true,
            last_revision: None,
            last_ingested_at: None,
            total_records: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh the metadata-mirrored fields, keeping ingestion counters.
    pub fn apply_metadata(&mut self, meta: &ConnectorMetadata, now: DateTime<Utc>) {
        self.title = meta.title.clone();
        self.description = meta.description.clone();
        self.kind = meta.kind.as_str().to_string();
        self.homepage = meta.homepage.clone();
        self.schedule = Some(meta.schedule.clone());
        self.enabled = true;
        self.updated_at = now;
    }
}

/// Immutable result of one completed ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: Uuid,
    pub source_key: String,
    pub created_at: DateTime<Utc>,
    pub revision: Option<String>,
    pub record_count: i64,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub source_key: String,
    pub uid: String,
    pub jurisdiction: Option<String>,
    pub address: Option<String>,
    pub category: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub raw: Option<serde_json::Value>,
}

impl StoredRecord {
    pub fn from_normalized(snapshot_id: Uuid, source_key: &str, r: &NormalizedRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            snapshot_id,
            source_key: source_key.to_string(),
            uid: r.uid.clone(),
            jurisdiction: Some(r.jurisdiction.clone()),
            address: r.address.clone(),
            category: Some(r.category.as_str().to_string()),
            latitude: r.latitude,
            longitude: r.longitude,
            raw: Some(serde_json::Value::Object(r.raw.clone())),
        }
    }
}

/// Input for `insert_snapshot`; written atomically with its records.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub source_key: String,
    pub revision: Option<String>,
    pub metadata: serde_json::Value,
    pub records: Vec<NormalizedRecord>,
}

/// Storage seam used by persistence, the dataset builder and the API.
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Insert or refresh the source row for a connector.
    async fn upsert_source(&self, meta: &ConnectorMetadata) -> StoreResult<Source>;

    /// Stamp ingestion bookkeeping: total records, revision, now.
    async fn mark_ingested(&self, key: &str, record_count: i64, revision: Option<&str>) -> StoreResult<()>;

    async fn get_source(&self, key: &str) -> StoreResult<Option<Source>>;

    /// All sources ordered by title.
    async fn list_sources(&self) -> StoreResult<Vec<Source>>;

    async fn latest_snapshot(&self, key: &str) -> StoreResult<Option<Snapshot>>;

    /// Newest first.
    async fn list_snapshots(&self, key: &str) -> StoreResult<Vec<Snapshot>>;

    /// Create a snapshot and all its records in one unit; `record_count`
    /// equals the number of records written.
    async fn insert_snapshot(&self, new: NewSnapshot) -> StoreResult<Snapshot>;

    async fn records_for_snapshot(&self, snapshot_id: Uuid) -> StoreResult<Vec<StoredRecord>>;
}
