// src/connectors/atlas.rs
//! Feed connector for the Atlas of Surveillance CSV download.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::fetch::PageFetcher;
use super::normalize::{infer_category, normalize_text, pick_first, slugify, UidAllocator};
use super::samples::{load_samples, ATLAS_SAMPLE};
use super::{
    Category, Connector, ConnectorKind, ConnectorMetadata, ConnectorResult, NormalizedRecord,
    RunContext,
};

pub const ATLAS_ID: &str = "atlas-of-surveillance";
pub const DEFAULT_ATLAS_URL: &str =
    "https://www.atlasofsurveillance.org/download.csv?vendor=Flock+Safety";

type CsvRow = HashMap<String, String>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasSampleEntry {
    pub uid: String,
    pub title: String,
    pub jurisdiction: String,
    pub category: Option<Category>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source_url: Option<String>,
}

pub struct AtlasConnector {
    metadata: ConnectorMetadata,
    fetcher: Arc<dyn PageFetcher>,
    url: String,
    fallback: Vec<AtlasSampleEntry>,
}

impl AtlasConnector {
    pub fn new(fetcher: Arc<dyn PageFetcher>, samples_dir: &Path) -> Self {
        Self {
            metadata: ConnectorMetadata {
                id: ATLAS_ID.to_string(),
                title: "Atlas of Surveillance".to_string(),
                kind: ConnectorKind::Feed,
                schedule: "0 0 * * *".to_string(),
                homepage: Some("https://atlasofsurveillance.org/".to_string()),
                description: Some(
                    "Imports crowd-sourced and reported surveillance datasets maintained by the EFF Atlas of Surveillance project."
                        .to_string(),
                ),
            },
            fetcher,
            url: DEFAULT_ATLAS_URL.to_string(),
            fallback: load_samples(samples_dir, ATLAS_SAMPLE),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_fallback(mut self, fallback: Vec<AtlasSampleEntry>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Parse the CSV body into records. Unparsable input yields no records.
    pub fn parse_csv(&self, body: &str) -> Vec<NormalizedRecord> {
        if body.trim().is_empty() {
            return Vec::new();
        }
        let t0 = std::time::Instant::now();

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(body.as_bytes());

        let mut rows: Vec<CsvRow> = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            match row {
                Ok(r) => rows.push(r),
                Err(e) => {
                    tracing::warn!(error = %e, connector = ATLAS_ID, "unable to parse csv");
                    return Vec::new();
                }
            }
        }

        let mut alloc = UidAllocator::new();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let Some((base_uid, mut record)) = self.normalize_row(&row) else {
                continue;
            };
            let (uid, duplicate_index) = alloc.allocate(&base_uid);
            record.uid = uid;
            record.raw.insert("atlasBaseUid".into(), json!(base_uid));
            record
                .raw
                .insert("atlasDuplicateIndex".into(), json!(duplicate_index));
            out.push(record);
        }

        histogram!("ingest_parse_ms", "connector" => ATLAS_ID)
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        out
    }

    fn normalize_row(&self, row: &CsvRow) -> Option<(String, NormalizedRecord)> {
        if row.values().all(|v| v.trim().is_empty()) {
            return None;
        }

        let city = pick(row, &["City"]);
        let county = pick(row, &["County"]);
        let state = pick(row, &["State"]);
        let technology = pick(row, &["Technology"]);
        let summary = pick(row, &["Summary"]).map(|s| normalize_text(&s));
        let agency = pick(row, &["Agency"]);
        let source_url = pick(row, &["Link 1", "Link 2", "Link 3", "Other Links"]);

        let parts: Vec<&str> = [&city, &county, &state]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .collect();
        let jurisdiction = if parts.is_empty() {
            "Unknown Jurisdiction".to_string()
        } else {
            parts.join(", ")
        };

        let category = match technology.as_deref() {
            Some(t) => infer_category(t),
            None => infer_category(
                summary
                    .as_deref()
                    .or(agency.as_deref())
                    .unwrap_or("Surveillance Record"),
            ),
        };

        let uid_source = pick(row, &["AOSNUMBER"]).unwrap_or_else(|| {
            let title = agency
                .as_deref()
                .or(summary.as_deref())
                .unwrap_or("surveillance");
            slugify(&format!("{title}-{jurisdiction}"))
        });
        let base_uid = format!("{}-{}", self.metadata.id, uid_source);

        let mut raw = Map::new();
        raw.insert("agency".into(), json!(agency));
        raw.insert("technology".into(), json!(technology));
        raw.insert("summary".into(), json!(summary));
        raw.insert("county".into(), json!(county));
        raw.insert("city".into(), json!(city));
        raw.insert("state".into(), json!(state));
        raw.insert("sourceUrl".into(), json!(source_url));
        raw.insert("row".into(), json!(row));

        let record = NormalizedRecord {
            uid: base_uid.clone(),
            source_id: self.metadata.id.clone(),
            jurisdiction,
            category,
            latitude: None,
            longitude: None,
            address: pick_first([summary.as_deref(), agency.as_deref()]),
            raw,
        };
        Some((base_uid, record))
    }

    fn fallback_result(&self, ctx: &RunContext) -> ConnectorResult {
        counter!("ingest_fallback_total", "connector" => ATLAS_ID, "scope" => "source").increment(1);
        let records = self
            .fallback
            .iter()
            .map(|entry| {
                let mut raw = Map::new();
                raw.insert(
                    "sourceUrl".into(),
                    entry.source_url.clone().map(Value::String).unwrap_or(Value::Null),
                );
                NormalizedRecord {
                    uid: format!("{}-{}", self.metadata.id, entry.uid),
                    source_id: self.metadata.id.clone(),
                    jurisdiction: entry.jurisdiction.clone(),
                    category: entry.category.unwrap_or(Category::Surveillance),
                    latitude: None,
                    longitude: None,
                    address: Some(entry.title.clone()),
                    raw,
                }
                .with_coordinates(entry.latitude, entry.longitude)
            })
            .collect();
        ConnectorResult::fallback(
            super::normalize::ensure_unique_uids(records),
            Some(ctx.job_id.clone()),
        )
    }
}

fn pick(row: &CsvRow, keys: &[&str]) -> Option<String> {
    pick_first(keys.iter().map(|k| row.get(*k).map(String::as_str)))
}

#[async_trait]
impl Connector for AtlasConnector {
    fn metadata(&self) -> &ConnectorMetadata {
        &self.metadata
    }

    async fn collect(&self, ctx: &RunContext) -> ConnectorResult {
        let body = match self.fetcher.get_text(&self.url).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    connector = ATLAS_ID,
                    "failed to fetch dataset; using fallback sample"
                );
                return self.fallback_result(ctx);
            }
        };

        let records = self.parse_csv(&body);
        if records.is_empty() {
            tracing::warn!(
                connector = ATLAS_ID,
                "feed returned zero records; using fallback sample"
            );
            return self.fallback_result(ctx);
        }

        let revision = records.len().to_string();
        ConnectorResult::live(records, Some(revision))
    }
}
