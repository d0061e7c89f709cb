// src/api.rs
//! Read-only HTTP surface over the stored datasets.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::dataset::{DatasetService, DatasetSource, JsonExporter, LatestDataset};
use crate::store::{Source, StoreError};

#[derive(Clone)]
pub struct AppState {
    dataset: DatasetService,
    exporter: Option<Arc<JsonExporter>>,
}

impl AppState {
    pub fn new(dataset: DatasetService) -> Self {
        Self {
            dataset,
            exporter: None,
        }
    }

    pub fn with_exporter(mut self, exporter: Arc<JsonExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sources", get(list_sources))
        .route("/datasets/latest", get(latest_dataset))
        .route("/datasets/export/latest", get(latest_export))
        .route("/datasets/{key}", get(source_dataset))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self.0, "api: store error");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal error" })),
        )
            .into_response()
    }
}

async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<Source>>, ApiError> {
    Ok(Json(state.dataset.store().list_sources().await?))
}

async fn latest_dataset(State(state): State<AppState>) -> Result<Json<LatestDataset>, ApiError> {
    Ok(Json(state.dataset.build_latest().await?))
}

/// The file the exporter last wrote, else a freshly built view.
async fn latest_export(State(state): State<AppState>) -> Result<Json<LatestDataset>, ApiError> {
    if let Some(exporter) = &state.exporter {
        if let Some(on_disk) = exporter.read_latest_from_disk().await {
            return Ok(Json(on_disk));
        }
    }
    Ok(Json(state.dataset.build_latest().await?))
}

async fn source_dataset(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let found: Option<DatasetSource> = state.dataset.build_source(&key).await?;
    Ok(match found {
        Some(source) => Json(source).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no dataset for source {key}") })),
        )
            .into_response(),
    })
}
