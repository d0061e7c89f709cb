// src/connectors/mod.rs
//! Connector contract shared by every source adapter, plus the concrete
//! connectors (CSV feed, geodata API, crawled website).

pub mod atlas;
pub mod fetch;
pub mod normalize;
pub mod overpass;
pub mod redlight;
pub mod registry;
pub mod samples;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use registry::{ConnectorRegistry, RegistryError};

/// How a connector obtains its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Feed,
    Api,
    Crawl,
}

impl ConnectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Feed => "feed",
            ConnectorKind::Api => "api",
            ConnectorKind::Crawl => "crawl",
        }
    }
}

impl std::fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable identity of a source. Built once when the connector is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorMetadata {
    pub id: String,
    pub title: String,
    pub kind: ConnectorKind,
    /// Cron expression (5 or 6 fields).
    pub schedule: String,
    pub homepage: Option<String>,
    pub description: Option<String>,
}

/// Closed-ish vocabulary of surveillance categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    LicensePlateReader,
    FacialRecognition,
    Drone,
    Camera,
    RedlightCamera,
    Surveillance,
    /// Also absorbs labels this build does not know.
    #[serde(other)]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::LicensePlateReader => "license_plate_reader",
            Category::FacialRecognition => "facial_recognition",
            Category::Drone => "drone",
            Category::Camera => "camera",
            Category::RedlightCamera => "redlight_camera",
            Category::Surveillance => "surveillance",
            Category::Other => "other",
        }
    }

    /// Parse a stored category label; unknown labels map to `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "license_plate_reader" => Category::LicensePlateReader,
            "facial_recognition" => Category::FacialRecognition,
            "drone" => Category::Drone,
            "camera" => Category::Camera,
            "redlight_camera" => Category::RedlightCamera,
            "surveillance" => Category::Surveillance,
            _ => Category::Other,
        }
    }
}

/// One source record in the shared shape every connector produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    /// Unique within one connector result set.
    pub uid: String,
    pub source_id: String,
    pub jurisdiction: String,
    pub category: Category,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    /// Source-specific fields kept for audit.
    #[serde(default)]
    pub raw: serde_json::Map<String, serde_json::Value>,
}

impl NormalizedRecord {
    /// Drop coordinates that are not finite floats.
    pub fn with_coordinates(mut self, latitude: Option<f64>, longitude: Option<f64>) -> Self {
        self.latitude = latitude.filter(|v| v.is_finite());
        self.longitude = longitude.filter(|v| v.is_finite());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorResult {
    pub records: Vec<NormalizedRecord>,
    pub fetched_at: DateTime<Utc>,
    /// Opaque change-detection token.
    pub source_revision: Option<String>,
    /// True when the records come from a bundled offline sample.
    pub is_fallback: bool,
}

impl ConnectorResult {
    pub fn live(records: Vec<NormalizedRecord>, source_revision: Option<String>) -> Self {
        Self {
            records,
            fetched_at: Utc::now(),
            source_revision,
            is_fallback: false,
        }
    }

    pub fn fallback(records: Vec<NormalizedRecord>, source_revision: Option<String>) -> Self {
        Self {
            records,
            fetched_at: Utc::now(),
            source_revision,
            is_fallback: true,
        }
    }
}

/// Per-invocation context handed to `collect` by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub job_id: String,
    pub attempt: u32,
    pub scheduled_for: DateTime<Utc>,
}

impl RunContext {
    pub fn new(job_id: impl Into<String>, attempt: u32, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            attempt,
            scheduled_for,
        }
    }
}

/// A source-specific adapter.
///
/// `collect` is infallible by signature: network errors, non-2xx responses and
/// empty bodies are handled inside the connector and surface as a fallback
/// result. The caller owns the timeout and may drop the future at any await.
#[async_trait]
pub trait Connector: Send + Sync {
    fn metadata(&self) -> &ConnectorMetadata;

    async fn collect(&self, ctx: &RunContext) -> ConnectorResult;

    fn id(&self) -> &str {
        &self.metadata().id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_labels_round_trip_and_unknown_maps_to_other() {
        for c in [
            Category::LicensePlateReader,
            Category::FacialRecognition,
            Category::Drone,
            Category::Camera,
            Category::RedlightCamera,
            Category::Surveillance,
        ] {
            assert_eq!(Category::from_label(c.as_str()), c);
        }
        assert_eq!(Category::from_label("sonar"), Category::Other);
    }

    #[test]
    fn non_finite_coordinates_are_dropped() {
        let rec = NormalizedRecord {
            uid: "x".into(),
            source_id: "s".into(),
            jurisdiction: "Somewhere".into(),
            category: Category::Camera,
            latitude: None,
            longitude: None,
            address: None,
            raw: Default::default(),
        }
        .with_coordinates(Some(f64::NAN), Some(12.5));
        assert_eq!(rec.latitude, None);
        assert_eq!(rec.longitude, Some(12.5));
    }

    #[test]
    fn record_serializes_with_camel_case_and_snake_case_category() {
        let rec = NormalizedRecord {
            uid: "u".into(),
            source_id: "src".into(),
            jurisdiction: "Portland, OR".into(),
            category: Category::RedlightCamera,
            latitude: Some(1.0),
            longitude: Some(2.0),
            address: Some("A & B".into()),
            raw: Default::default(),
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["sourceId"], "src");
        assert_eq!(v["category"], "redlight_camera");
    }
}
