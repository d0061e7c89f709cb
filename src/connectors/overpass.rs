// src/connectors/overpass.rs
//! Geodata API connector: OpenStreetMap ALPR nodes via the Overpass API,
//! enriched with reverse-geocoded addresses where tags are incomplete.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};

use super::fetch::PageFetcher;
use super::normalize::{combine_street, ensure_unique_uids, pick_first};
use super::samples::{load_samples, OVERPASS_SAMPLE};
use super::{
    Category, Connector, ConnectorKind, ConnectorMetadata, ConnectorResult, NormalizedRecord,
    RunContext,
};
use crate::geocoding::{ReverseGeocodeResult, ReverseGeocoder};

pub const OVERPASS_ID: &str = "overpass-alpr";
pub const OVERPASS_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";
const DEFAULT_ADDRESS_LABEL: &str = "ALPR surveillance node";
const DEFAULT_COUNTRY: &str = "United States";

const OVERPASS_QUERY: &str = r#"
[out:json][timeout:60];
area["ISO3166-1"="US"]->.usa;
(
  node
    ["man_made"="surveillance"]
    ["surveillance"="public"]
    ["surveillance:zone"="traffic"]
    ["surveillance:type"="ALPR"]
    ["camera:type"="fixed"]
    ["manufacturer:wikidata"="Q108485435"]
    (area.usa);
);
out body;
>;
out skel qt;
"#;

pub type Tags = BTreeMap<String, String>;

/// A geodata point with optional OSM tags. Also the shape of the bundled sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverpassNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub tags: Option<Tags>,
}

#[derive(Debug, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Option<Vec<OverpassElement>>,
    #[serde(default)]
    pub osm3s: Option<Osm3s>,
}

#[derive(Debug, Deserialize)]
pub struct OverpassElement {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub tags: Option<Tags>,
}

#[derive(Debug, Deserialize)]
pub struct Osm3s {
    pub timestamp_osm_base: Option<String>,
    pub timestamp_areas_base: Option<String>,
}

/// Location facts read from a node's own tags.
#[derive(Debug, Default, PartialEq)]
struct TagMetadata {
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
    address: Option<String>,
}

fn tag<'a>(tags: &'a Tags, key: &str) -> Option<&'a str> {
    tags.get(key).map(String::as_str)
}

fn tag_metadata(node: &OverpassNode) -> TagMetadata {
    let Some(tags) = node.tags.as_ref() else {
        return TagMetadata::default();
    };
    let street = combine_street(tag(tags, "addr:housenumber"), tag(tags, "addr:street"));
    TagMetadata {
        city: pick_first([
            tag(tags, "addr:city"),
            tag(tags, "is_in:city"),
            tag(tags, "addr:town"),
            tag(tags, "addr:hamlet"),
            tag(tags, "city"),
        ]),
        state: pick_first([
            tag(tags, "addr:state"),
            tag(tags, "is_in:state_code"),
            tag(tags, "addr:province"),
            tag(tags, "state"),
        ]),
        country: pick_first([tag(tags, "addr:country"), tag(tags, "country")]),
        address: pick_first([
            tag(tags, "name"),
            tag(tags, "addr:full"),
            street.as_deref(),
            tag(tags, "surveillance:monitoring"),
            tag(tags, "operator"),
        ]),
    }
}

/// Reverse geocode only when the tags lack city, state or address.
pub fn needs_reverse_geocode(node: &OverpassNode) -> bool {
    let m = tag_metadata(node);
    m.city.is_none() || m.state.is_none() || m.address.is_none()
}

/// Keep `node` elements with finite coordinates.
pub fn extract_nodes(response: &OverpassResponse) -> Vec<OverpassNode> {
    let Some(elements) = response.elements.as_ref() else {
        return Vec::new();
    };
    elements
        .iter()
        .filter(|e| e.kind.as_deref() == Some("node"))
        .filter_map(|e| match (e.lat, e.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some(OverpassNode {
                id: e.id,
                lat,
                lon,
                tags: e.tags.clone(),
            }),
            _ => None,
        })
        .collect()
}

pub fn osm_url(id: i64) -> String {
    format!("https://www.openstreetmap.org/node/{id}")
}

pub struct OverpassConnector {
    metadata: ConnectorMetadata,
    fetcher: Arc<dyn PageFetcher>,
    geocoder: Arc<dyn ReverseGeocoder>,
    endpoint: String,
    fallback: Vec<OverpassNode>,
}

impl OverpassConnector {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        geocoder: Arc<dyn ReverseGeocoder>,
        samples_dir: &Path,
    ) -> Self {
        Self {
            metadata: ConnectorMetadata {
                id: OVERPASS_ID.to_string(),
                title: "OpenStreetMap ALPR Surveillance".to_string(),
                kind: ConnectorKind::Api,
                schedule: "0 0 * * *".to_string(),
                homepage: Some("https://overpass-turbo.eu/".to_string()),
                description: Some(
                    "Imports OpenStreetMap nodes tagged as ALPR surveillance equipment via the Overpass API."
                        .to_string(),
                ),
            },
            fetcher,
            geocoder,
            endpoint: OVERPASS_ENDPOINT.to_string(),
            fallback: load_samples(samples_dir, OVERPASS_SAMPLE),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_fallback(mut self, fallback: Vec<OverpassNode>) -> Self {
        self.fallback = fallback;
        self
    }

    async fn fetch(&self) -> Result<OverpassResponse> {
        let body = self
            .fetcher
            .post_form(&self.endpoint, &[("data", OVERPASS_QUERY.trim())])
            .await?;
        serde_json::from_str(&body).context("parsing overpass response")
    }

    /// Normalize one node, consulting the geocoder only when allowed and needed.
    pub async fn to_record(&self, node: &OverpassNode, allow_reverse_geocode: bool) -> NormalizedRecord {
        let tags = tag_metadata(node);
        let reverse: Option<ReverseGeocodeResult> =
            if allow_reverse_geocode && needs_reverse_geocode(node) {
                self.geocoder.reverse_geocode(node.lat, node.lon).await
            } else {
                None
            };
        let rg = reverse.as_ref();

        let city = pick_first([
            tags.city.as_deref(),
            rg.and_then(|r| r.city.as_deref()),
            rg.and_then(|r| r.county.as_deref()),
        ]);
        let state = pick_first([tags.state.as_deref(), rg.and_then(|r| r.state.as_deref())]);
        let country = pick_first([
            tags.country.as_deref(),
            rg.and_then(|r| r.country.as_deref()),
            rg.and_then(|r| (r.country_code.as_deref() == Some("US")).then_some(DEFAULT_COUNTRY)),
        ])
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string());

        let street = rg.and_then(|r| combine_street(r.house_number.as_deref(), r.road.as_deref()));
        let address = pick_first([
            rg.and_then(|r| r.formatted_address.as_deref()),
            street.as_deref(),
            tags.address.as_deref(),
        ])
        .unwrap_or_else(|| DEFAULT_ADDRESS_LABEL.to_string());

        let parts: Vec<&str> = [city.as_deref(), state.as_deref()].into_iter().flatten().collect();
        let jurisdiction = if parts.is_empty() {
            country
        } else {
            parts.join(", ")
        };

        let mut raw = Map::new();
        raw.insert("id".into(), json!(node.id));
        raw.insert("tags".into(), json!(node.tags.clone().unwrap_or_default()));
        raw.insert("sourceUrl".into(), json!(osm_url(node.id)));
        if let Some(r) = reverse {
            raw.insert("reverseGeocode".into(), json!(r));
        }

        NormalizedRecord {
            uid: format!("{}-{}", self.metadata.id, node.id),
            source_id: self.metadata.id.clone(),
            jurisdiction,
            category: Category::LicensePlateReader,
            latitude: None,
            longitude: None,
            address: Some(address),
            raw,
        }
        .with_coordinates(Some(node.lat), Some(node.lon))
    }

    async fn build_records(&self, nodes: &[OverpassNode], allow_reverse_geocode: bool) -> Vec<NormalizedRecord> {
        let targets = if allow_reverse_geocode {
            nodes.iter().filter(|n| needs_reverse_geocode(n)).count()
        } else {
            0
        };
        if targets > 0 {
            tracing::info!(connector = OVERPASS_ID, targets, "reverse geocoding nodes");
        }

        let mut out = Vec::with_capacity(nodes.len());
        let mut done = 0usize;
        for node in nodes {
            if allow_reverse_geocode && needs_reverse_geocode(node) {
                done += 1;
                if done % 25 == 0 || done == targets {
                    tracing::info!(
                        connector = OVERPASS_ID,
                        processed = done,
                        remaining = targets - done,
                        "reverse geocoding progress"
                    );
                }
            }
            out.push(self.to_record(node, allow_reverse_geocode).await);
        }
        ensure_unique_uids(out)
    }

    async fn fallback_result(&self, ctx: &RunContext) -> ConnectorResult {
        counter!("ingest_fallback_total", "connector" => OVERPASS_ID, "scope" => "source").increment(1);
        let records = self.build_records(&self.fallback, false).await;
        ConnectorResult::fallback(records, Some(ctx.job_id.clone()))
    }
}

#[async_trait]
impl Connector for OverpassConnector {
    fn metadata(&self) -> &ConnectorMetadata {
        &self.metadata
    }

    async fn collect(&self, ctx: &RunContext) -> ConnectorResult {
        let response = match self.fetch().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    connector = OVERPASS_ID,
                    "failed to fetch ALPR dataset; using fallback sample"
                );
                return self.fallback_result(ctx).await;
            }
        };

        let nodes = extract_nodes(&response);
        let records = self.build_records(&nodes, true).await;
        if records.is_empty() {
            tracing::warn!(
                connector = OVERPASS_ID,
                "API returned zero ALPR nodes; using fallback sample"
            );
            return self.fallback_result(ctx).await;
        }

        let revision = response.osm3s.as_ref().and_then(|o| {
            o.timestamp_osm_base
                .clone()
                .or_else(|| o.timestamp_areas_base.clone())
        });
        ConnectorResult::live(records, revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_nodes_keeps_only_nodes_with_coordinates() {
        let resp: OverpassResponse = serde_json::from_value(json!({
            "elements": [
                { "type": "node", "id": 1, "lat": 10.0, "lon": 20.0 },
                { "type": "way", "id": 2, "lat": 30.0, "lon": 40.0 },
                { "type": "node", "id": 3, "lon": 40.0 },
                { "type": "node", "id": 4, "lat": 15.0, "lon": -5.0, "tags": { "name": "Valid" } }
            ]
        }))
        .unwrap();
        let nodes = extract_nodes(&resp);
        let ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(
            nodes[1].tags.as_ref().and_then(|t| t.get("name")).map(String::as_str),
            Some("Valid")
        );
    }

    #[test]
    fn reverse_geocode_needed_only_when_tags_incomplete() {
        let mut tags = Tags::new();
        tags.insert("addr:city".into(), "San Francisco".into());
        tags.insert("addr:state".into(), "CA".into());
        let mut node = OverpassNode { id: 1, lat: 1.0, lon: 1.0, tags: Some(tags.clone()) };
        assert!(needs_reverse_geocode(&node), "no address tag yet");

        tags.insert("operator".into(), "SFPD".into());
        node.tags = Some(tags);
        assert!(!needs_reverse_geocode(&node));
    }

    #[test]
    fn street_tags_combine_into_address() {
        let mut tags = Tags::new();
        tags.insert("addr:housenumber".into(), "12".into());
        tags.insert("addr:street".into(), "Elm St".into());
        let node = OverpassNode { id: 1, lat: 1.0, lon: 1.0, tags: Some(tags) };
        assert_eq!(tag_metadata(&node).address.as_deref(), Some("12 Elm St"));
    }
}
