// tests/api_http.rs
//
// HTTP-level tests for the read API without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{Map, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use surveillance_ingest::api::{self, AppState};
use surveillance_ingest::connectors::{
    Category, Connector, ConnectorKind, ConnectorMetadata, ConnectorResult, NormalizedRecord, RunContext,
};
use surveillance_ingest::dataset::{DatasetExporter, DatasetService, JsonExporter};
use surveillance_ingest::ingest::IngestPersistence;
use surveillance_ingest::store::{IngestStore, MemoryStore};

const BODY_LIMIT: usize = 1024 * 1024;

struct Feed(ConnectorMetadata);

#[async_trait]
impl Connector for Feed {
    fn metadata(&self) -> &ConnectorMetadata {
        &self.0
    }

    async fn collect(&self, _ctx: &RunContext) -> ConnectorResult {
        ConnectorResult::live(Vec::new(), None)
    }
}

fn feed(id: &str) -> Feed {
    Feed(ConnectorMetadata {
        id: id.into(),
        title: id.to_uppercase(),
        kind: ConnectorKind::Feed,
        schedule: "0 0 * * *".into(),
        homepage: None,
        description: None,
    })
}

async fn store_with_data() -> Arc<dyn IngestStore> {
    let store: Arc<dyn IngestStore> = Arc::new(MemoryStore::new());
    let record = NormalizedRecord {
        uid: "s-1".into(),
        source_id: "s".into(),
        jurisdiction: "Town, ST".into(),
        category: Category::Drone,
        latitude: None,
        longitude: None,
        address: None,
        raw: Map::new(),
    };
    IngestPersistence::new(store.clone())
        .persist(&feed("s"), ConnectorResult::live(vec![record], Some("rev".into())))
        .await
        .unwrap();
    store.upsert_source(&feed("bare").0).await.unwrap();
    store
}

async fn get(app: Router, uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, json)
}

#[tokio::test]
async fn sources_lists_every_source() {
    let app = api::create_router(AppState::new(DatasetService::new(store_with_data().await)));
    let (status, body) = get(app, "/sources").await;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&str> = body.as_array().unwrap().iter().map(|s| s["key"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["bare", "s"]);
    assert_eq!(body[1]["totalRecords"], 1);
    assert_eq!(body[1]["lastRevision"], "rev");
}

#[tokio::test]
async fn datasets_latest_and_by_key() {
    let app = api::create_router(AppState::new(DatasetService::new(store_with_data().await)));

    let (status, body) = get(app.clone(), "/datasets/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sources"].as_array().unwrap().len(), 1);
    assert_eq!(body["sources"][0]["records"][0]["uid"], "s-1");
    assert_eq!(body["sources"][0]["records"][0]["category"], "drone");

    let (status, body) = get(app.clone(), "/datasets/s").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["snapshot"]["recordCount"], 1);

    let (status, _) = get(app.clone(), "/datasets/bare").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(app, "/datasets/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_endpoint_prefers_file_on_disk() {
    let store = store_with_data().await;
    let dataset = DatasetService::new(store);
    let dir = tempfile::tempdir().unwrap();
    let exporter = Arc::new(JsonExporter::new(dir.path(), dataset.clone()));
    let app = api::create_router(AppState::new(dataset).with_exporter(exporter.clone()));

    // nothing written yet: built on the fly
    let (status, body) = get(app.clone(), "/datasets/export/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sources"].as_array().unwrap().len(), 1);

    let written = exporter.write_latest_snapshot().await.unwrap();
    let (_, body) = get(app, "/datasets/export/latest").await;
    assert_eq!(body["generatedAt"], serde_json::to_value(written.generated_at).unwrap());
}

#[tokio::test]
async fn health_is_ok() {
    let app = api::create_router(AppState::new(DatasetService::new(Arc::new(MemoryStore::new()))));
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
