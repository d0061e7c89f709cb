// tests/overpass_api.rs
//
// Geodata connector with a counting stub geocoder.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use common::StaticPages;
use surveillance_ingest::connectors::fetch::PageFetcher;
use surveillance_ingest::connectors::overpass::{OverpassConnector, OverpassNode, Tags};
use surveillance_ingest::connectors::{Category, Connector, RunContext};
use surveillance_ingest::geocoding::{ReverseGeocodeResult, ReverseGeocoder};

const ENDPOINT: &str = "https://overpass.test/api/interpreter";

#[derive(Default)]
struct CountingGeocoder {
    calls: AtomicUsize,
}

#[async_trait]
impl ReverseGeocoder for CountingGeocoder {
    async fn reverse_geocode(&self, _lat: f64, _lon: f64) -> Option<ReverseGeocodeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(ReverseGeocodeResult {
            formatted_address: Some("100 Geo Rd, Denver, CO".into()),
            city: Some("Denver".into()),
            state: Some("Colorado".into()),
            country_code: Some("US".into()),
            ..Default::default()
        })
    }
}

fn response() -> String {
    json!({
        "osm3s": { "timestamp_osm_base": "2024-05-01T00:00:00Z" },
        "elements": [
            {
                "type": "node", "id": 1, "lat": 37.77, "lon": -122.41,
                "tags": { "addr:city": "San Francisco", "addr:state": "CA", "name": "Market St ALPR" }
            },
            { "type": "node", "id": 2, "lat": 39.73, "lon": -104.99, "tags": { "addr:state": "CO" } },
            { "type": "way", "id": 3 }
        ]
    })
    .to_string()
}

fn connector(pages: StaticPages, geocoder: Arc<CountingGeocoder>) -> OverpassConnector {
    let fallback = vec![OverpassNode {
        id: 99,
        lat: 1.0,
        lon: 2.0,
        tags: Some(Tags::new()),
    }];
    OverpassConnector::new(Arc::new(pages) as Arc<dyn PageFetcher>, geocoder, Path::new("/nonexistent"))
        .with_endpoint(ENDPOINT)
        .with_fallback(fallback)
}

fn ctx() -> RunContext {
    RunContext::new("job-7", 1, Utc::now())
}

#[tokio::test]
async fn only_incomplete_nodes_are_reverse_geocoded_and_tags_win() {
    let geo = Arc::new(CountingGeocoder::default());
    let c = connector(StaticPages::new().with_page(ENDPOINT, response()), geo.clone());
    let result = c.collect(&ctx()).await;

    assert!(!result.is_fallback);
    assert_eq!(result.source_revision.as_deref(), Some("2024-05-01T00:00:00Z"));
    assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.records.len(), 2);

    let sf = &result.records[0];
    assert_eq!(sf.uid, "overpass-alpr-1");
    assert_eq!(sf.jurisdiction, "San Francisco, CA");
    assert_eq!(sf.address.as_deref(), Some("Market St ALPR"));
    assert_eq!(sf.category, Category::LicensePlateReader);
    assert!(sf.raw.get("reverseGeocode").is_none());
    assert_eq!(sf.raw["sourceUrl"], "https://www.openstreetmap.org/node/1");

    let denver = &result.records[1];
    // tag state beats the geocoder's
    assert_eq!(denver.jurisdiction, "Denver, CO");
    assert_eq!(denver.address.as_deref(), Some("100 Geo Rd, Denver, CO"));
    assert_eq!(denver.raw["reverseGeocode"]["city"], "Denver");
}

#[tokio::test]
async fn failure_uses_sample_without_geocoding() {
    let geo = Arc::new(CountingGeocoder::default());
    let c = connector(StaticPages::new(), geo.clone());
    let result = c.collect(&ctx()).await;

    assert!(result.is_fallback);
    assert_eq!(geo.calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].jurisdiction, "United States");
    assert_eq!(result.records[0].address.as_deref(), Some("ALPR surveillance node"));
}

#[tokio::test]
async fn empty_or_malformed_response_uses_sample() {
    let geo = Arc::new(CountingGeocoder::default());
    let empty = connector(StaticPages::new().with_page(ENDPOINT, r#"{"elements":[]}"#), geo.clone());
    assert!(empty.collect(&ctx()).await.is_fallback);

    let garbage = connector(StaticPages::new().with_page(ENDPOINT, "<html>rate limited</html>"), geo);
    assert!(garbage.collect(&ctx()).await.is_fallback);
}

#[tokio::test]
async fn geocoded_address_replaces_partial_tag_address() {
    let geo = Arc::new(CountingGeocoder::default());
    let body = json!({
        "elements": [{
            "type": "node", "id": 5, "lat": 39.7, "lon": -105.0,
            "tags": { "addr:housenumber": "12", "addr:street": "Tag Street", "addr:state": "CO" }
        }]
    })
    .to_string();
    let c = connector(StaticPages::new().with_page(ENDPOINT, body), geo.clone());
    let result = c.collect(&ctx()).await;

    // city is missing from the tags, so the node is looked up
    assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
    let record = &result.records[0];
    assert_eq!(record.jurisdiction, "Denver, CO");
    assert_eq!(record.address.as_deref(), Some("100 Geo Rd, Denver, CO"));
    assert_eq!(record.raw["tags"]["addr:street"], "Tag Street");
}
