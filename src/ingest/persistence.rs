// src/ingest/persistence.rs
use std::sync::Arc;

use metrics::counter;
use serde_json::json;

use crate::connectors::{Connector, ConnectorResult};
use crate::store::{IngestStore, NewSnapshot, Snapshot, StoreResult};

/// What `persist` did with a connector result.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    /// A new snapshot was written with the result's records.
    Created(Snapshot),
    /// Fallback data was discarded; the source now reports this existing snapshot.
    Retained(Snapshot),
}

impl PersistOutcome {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            PersistOutcome::Created(s) | PersistOutcome::Retained(s) => s,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, PersistOutcome::Created(_))
    }
}

/// The only writer of sources, snapshots and records.
#[derive(Clone)]
pub struct IngestPersistence {
    store: Arc<dyn IngestStore>,
}

impl IngestPersistence {
    pub fn new(store: Arc<dyn IngestStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn IngestStore> {
        &self.store
    }

    /// Fallback results never replace an existing snapshot. Without one, the
    /// fallback data becomes the first snapshot.
    pub async fn persist(&self, connector: &dyn Connector, result: ConnectorResult) -> StoreResult<PersistOutcome> {
        let meta = connector.metadata();
        let source = self.store.upsert_source(meta).await?;

        if result.is_fallback {
            if let Some(existing) = self.store.latest_snapshot(&source.key).await? {
                self.store
                    .mark_ingested(&source.key, existing.record_count, existing.revision.as_deref())
                    .await?;
                counter!("ingest_snapshots_retained_total", "connector" => meta.id.clone()).increment(1);
                tracing::info!(
                    connector = %meta.id,
                    snapshot = %existing.id,
                    records = existing.record_count,
                    "fallback result; keeping previous snapshot"
                );
                return Ok(PersistOutcome::Retained(existing));
            }
            tracing::warn!(connector = %meta.id, "no prior snapshot; storing fallback data as first snapshot");
        }

        let snapshot = self
            .store
            .insert_snapshot(NewSnapshot {
                source_key: source.key.clone(),
                revision: result.source_revision.clone(),
                metadata: json!({
                    "fetchedAt": result.fetched_at,
                    "isFallback": result.is_fallback,
                }),
                records: result.records,
            })
            .await?;
        self.store
            .mark_ingested(&source.key, snapshot.record_count, snapshot.revision.as_deref())
            .await?;

        counter!("ingest_snapshots_total", "connector" => meta.id.clone()).increment(1);
        counter!("ingest_records_total", "connector" => meta.id.clone()).increment(snapshot.record_count.max(0) as u64);
        tracing::info!(
            connector = %meta.id,
            snapshot = %snapshot.id,
            records = snapshot.record_count,
            revision = ?snapshot.revision,
            "snapshot stored"
        );
        Ok(PersistOutcome::Created(snapshot))
    }
}
