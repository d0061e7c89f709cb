// tests/persistence_snapshots.rs
//
// Snapshot history and the fallback-retention policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Map;
use surveillance_ingest::connectors::{
    Category, Connector, ConnectorKind, ConnectorMetadata, ConnectorResult, NormalizedRecord, RunContext,
};
use surveillance_ingest::ingest::{IngestPersistence, PersistOutcome};
use surveillance_ingest::store::{IngestStore, MemoryStore};

struct Source(ConnectorMetadata);

#[async_trait]
impl Connector for Source {
    fn metadata(&self) -> &ConnectorMetadata {
        &self.0
    }

    async fn collect(&self, _ctx: &RunContext) -> ConnectorResult {
        ConnectorResult::live(Vec::new(), None)
    }
}

fn source() -> Source {
    Source(ConnectorMetadata {
        id: "x".into(),
        title: "Source X".into(),
        kind: ConnectorKind::Feed,
        schedule: "0 0 * * *".into(),
        homepage: Some("https://x.test".into()),
        description: None,
    })
}

fn records(n: usize) -> Vec<NormalizedRecord> {
    (0..n)
        .map(|i| NormalizedRecord {
            uid: format!("x-{i}"),
            source_id: "x".into(),
            jurisdiction: "Town, ST".into(),
            category: Category::Camera,
            latitude: Some(1.0),
            longitude: Some(2.0),
            address: Some(format!("{i} Main St")),
            raw: Map::new(),
        })
        .collect()
}

fn setup() -> (Arc<MemoryStore>, IngestPersistence) {
    let store = Arc::new(MemoryStore::new());
    let persistence = IngestPersistence::new(store.clone() as Arc<dyn IngestStore>);
    (store, persistence)
}

#[tokio::test]
async fn consecutive_runs_append_snapshots() {
    let (store, p) = setup();
    let src = source();

    let first = p.persist(&src, ConnectorResult::live(records(3), Some("r1".into()))).await.unwrap();
    let second = p.persist(&src, ConnectorResult::live(records(5), Some("r2".into()))).await.unwrap();
    assert!(first.is_created() && second.is_created());

    let history = store.list_snapshots("x").await.unwrap();
    assert_eq!(history.len(), 2);
    // newest first
    assert_eq!(history[0].record_count, 5);
    assert_eq!(history[1].record_count, 3);
    assert!(history[0].created_at > history[1].created_at);
    assert_ne!(history[0].id, history[1].id);
    assert_eq!(history[0].metadata["isFallback"], false);
    assert!(history[0].metadata.get("fetchedAt").is_some());

    for snap in &history {
        let stored = store.records_for_snapshot(snap.id).await.unwrap();
        assert_eq!(stored.len() as i64, snap.record_count);
        assert!(stored.iter().all(|r| r.snapshot_id == snap.id && r.source_key == "x"));
    }

    let s = store.get_source("x").await.unwrap().unwrap();
    assert_eq!(s.total_records, 5);
    assert_eq!(s.last_revision.as_deref(), Some("r2"));
    assert!(s.last_ingested_at.is_some());
}

#[tokio::test]
async fn fallback_after_success_keeps_previous_snapshot() {
    let (store, p) = setup();
    let src = source();

    let good = p.persist(&src, ConnectorResult::live(records(4), Some("good".into()))).await.unwrap();
    let fb = p.persist(&src, ConnectorResult::fallback(records(1), Some("job-9".into()))).await.unwrap();

    match &fb {
        PersistOutcome::Retained(snap) => assert_eq!(snap.id, good.snapshot().id),
        other => panic!("expected retained snapshot, got {other:?}"),
    }
    assert_eq!(store.list_snapshots("x").await.unwrap().len(), 1);

    let s = store.get_source("x").await.unwrap().unwrap();
    assert_eq!(s.total_records, 4);
    assert_eq!(s.last_revision.as_deref(), Some("good"));
}

#[tokio::test]
async fn first_ever_fallback_becomes_a_snapshot() {
    let (store, p) = setup();
    let outcome = p
        .persist(&source(), ConnectorResult::fallback(records(2), Some("job-1".into())))
        .await
        .unwrap();
    assert!(outcome.is_created());
    let snap = store.latest_snapshot("x").await.unwrap().unwrap();
    assert_eq!(snap.record_count, 2);
    assert_eq!(snap.metadata["isFallback"], true);
}

#[tokio::test]
async fn persist_refreshes_source_metadata() {
    let (store, p) = setup();
    let mut src = source();
    p.persist(&src, ConnectorResult::live(records(1), None)).await.unwrap();

    src.0.title = "Renamed".into();
    p.persist(&src, ConnectorResult::live(records(1), None)).await.unwrap();
    assert_eq!(store.get_source("x").await.unwrap().unwrap().title, "Renamed");
}
