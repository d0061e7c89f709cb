// src/dataset/mod.rs
//! Read-side view of the store: the latest snapshot of every source with
//! its records, as served by the API and written by the exporter.

pub mod export;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{IngestStore, Snapshot, Source, StoreResult, StoredRecord};

pub use export::{DatasetExporter, JsonExporter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub revision: Option<String>,
    pub record_count: i64,
}

impl From<&Snapshot> for DatasetSnapshot {
    fn from(s: &Snapshot) -> Self {
        Self {
            id: s.id,
            created_at: s.created_at,
            revision: s.revision.clone(),
            record_count: s.record_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRecord {
    pub uid: String,
    pub jurisdiction: Option<String>,
    pub address: Option<String>,
    pub category: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub raw: Option<serde_json::Value>,
}

impl From<StoredRecord> for DatasetRecord {
    fn from(r: StoredRecord) -> Self {
        Self {
            uid: r.uid,
            jurisdiction: r.jurisdiction,
            address: r.address,
            category: r.category,
            latitude: r.latitude,
            longitude: r.longitude,
            raw: r.raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSource {
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub kind: String,
    pub homepage: Option<String>,
    pub schedule: Option<String>,
    pub last_ingested_at: Option<DateTime<Utc>>,
    pub last_revision: Option<String>,
    pub total_records: i64,
    pub snapshot: DatasetSnapshot,
    pub records: Vec<DatasetRecord>,
}

impl DatasetSource {
    fn assemble(source: Source, snapshot: &Snapshot, records: Vec<StoredRecord>) -> Self {
        Self {
            key: source.key,
            title: source.title,
            description: source.description,
            kind: source.kind,
            homepage: source.homepage,
            schedule: source.schedule,
            last_ingested_at: source.last_ingested_at,
            last_revision: source.last_revision,
            total_records: source.total_records,
            snapshot: snapshot.into(),
            records: records.into_iter().map(DatasetRecord::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestDataset {
    pub generated_at: DateTime<Utc>,
    pub sources: Vec<DatasetSource>,
}

impl LatestDataset {
    pub fn record_count(&self) -> usize {
        self.sources.iter().map(|s| s.records.len()).sum()
    }
}

#[derive(Clone)]
pub struct DatasetService {
    store: Arc<dyn IngestStore>,
}

impl DatasetService {
    pub fn new(store: Arc<dyn IngestStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn IngestStore> {
        &self.store
    }

    /// `None` when the source is unknown or has never produced a snapshot.
    pub async fn build_source(&self, key: &str) -> StoreResult<Option<DatasetSource>> {
        let Some(source) = self.store.get_source(key).await? else {
            return Ok(None);
        };
        let Some(snapshot) = self.store.latest_snapshot(key).await? else {
            return Ok(None);
        };
        let records = self.store.records_for_snapshot(snapshot.id).await?;
        Ok(Some(DatasetSource::assemble(source, &snapshot, records)))
    }

    /// Every source with at least one snapshot, ordered by title.
    pub async fn build_latest(&self) -> StoreResult<LatestDataset> {
        let mut sources = Vec::new();
        for source in self.store.list_sources().await? {
            let Some(snapshot) = self.store.latest_snapshot(&source.key).await? else {
                continue;
            };
            let records = self.store.records_for_snapshot(snapshot.id).await?;
            sources.push(DatasetSource::assemble(source, &snapshot, records));
        }
        Ok(LatestDataset {
            generated_at: Utc::now(),
            sources,
        })
    }
}
