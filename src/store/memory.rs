// src/store/memory.rs
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{IngestStore, NewSnapshot, Snapshot, Source, StoreError, StoreResult, StoredRecord};
use crate::connectors::ConnectorMetadata;

#[derive(Default)]
struct Inner {
    sources: BTreeMap<String, Source>,
    /// Append-only, in creation order.
    snapshots: Vec<Snapshot>,
    records: HashMap<Uuid, Vec<StoredRecord>>,
    last_created: Option<DateTime<Utc>>,
}

impl Inner {
    // strictly increasing creation stamps even within one clock tick
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_created {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(stamp);
        stamp
    }
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IngestStore for MemoryStore {
    async fn upsert_source(&self, meta: &ConnectorMetadata) -> StoreResult<Source> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let source = inner
            .sources
            .entry(meta.id.clone())
            .and_modify(|s| s.apply_metadata(meta, now))
            .or_insert_with(|| {
                tracing::info!(source = %meta.id, "created new source record");
                Source::from_metadata(meta, now)
            });
        Ok(source.clone())
    }

    async fn mark_ingested(&self, key: &str, record_count: i64, revision: Option<&str>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let source = inner
            .sources
            .get_mut(key)
            .ok_or_else(|| StoreError::SourceNotFound(key.to_string()))?;
        let now = Utc::now();
        source.total_records = record_count;
        source.last_revision = revision.map(str::to_string);
        source.last_ingested_at = Some(now);
        source.updated_at = now;
        Ok(())
    }

    async fn get_source(&self, key: &str) -> StoreResult<Option<Source>> {
        Ok(self.inner.read().await.sources.get(key).cloned())
    }

    async fn list_sources(&self) -> StoreResult<Vec<Source>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Source> = inner.sources.values().cloned().collect();
        out.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(out)
    }

    async fn latest_snapshot(&self, key: &str) -> StoreResult<Option<Snapshot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .snapshots
            .iter()
            .rev()
            .find(|s| s.source_key == key)
            .cloned())
    }

    async fn list_snapshots(&self, key: &str) -> StoreResult<Vec<Snapshot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .snapshots
            .iter()
            .rev()
            .filter(|s| s.source_key == key)
            .cloned()
            .collect())
    }

    async fn insert_snapshot(&self, new: NewSnapshot) -> StoreResult<Snapshot> {
        let mut inner = self.inner.write().await;
        if !inner.sources.contains_key(&new.source_key) {
            return Err(StoreError::SourceNotFound(new.source_key));
        }
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            source_key: new.source_key.clone(),
            created_at: inner.next_created_at(),
            revision: new.revision,
            record_count: new.records.len() as i64,
            metadata: new.metadata,
        };
        let records = new
            .records
            .iter()
            .map(|r| StoredRecord::from_normalized(snapshot.id, &new.source_key, r))
            .collect();
        inner.records.insert(snapshot.id, records);
        inner.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn records_for_snapshot(&self, snapshot_id: Uuid) -> StoreResult<Vec<StoredRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .get(&snapshot_id)
            .cloned()
            .unwrap_or_default())
    }
}
