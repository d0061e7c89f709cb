// tests/redlight_crawl.rs
//
// Crawl connector against a static fixture site served from memory.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::StaticPages;
use surveillance_ingest::connectors::fetch::PageFetcher;
use surveillance_ingest::connectors::redlight::discovery::discover_cities;
use surveillance_ingest::connectors::redlight::robots::RobotsRules;
use surveillance_ingest::connectors::redlight::{
    CityOutcome, CrawlConfig, RedlightConnector, RedlightSampleEntry, RedlightSampleRecord,
};
use surveillance_ingest::connectors::{Category, Connector, RunContext};
use surveillance_ingest::ingest::IngestPersistence;
use surveillance_ingest::store::{IngestStore, MemoryStore};

const ORIGIN: &str = "https://www.redlightcameralist.com";

fn cfg() -> CrawlConfig {
    CrawlConfig {
        root_path: "/root/".into(),
        request_delay: Duration::ZERO,
        ..CrawlConfig::default()
    }
}

fn url(path: &str) -> String {
    format!("{ORIGIN}{path}")
}

fn site() -> StaticPages {
    StaticPages::new()
        .with_page(
            url("/root/"),
            r#"<html><body>
                <a href="/root/Alabama/">Alabama</a>
                <a href="https://elsewhere.test/root/Texas/">offsite</a>
                <a href="mailto:x@y.z">mail</a>
            </body></html>"#,
        )
        .with_page(
            url("/root/Alabama/"),
            r#"<a href="/root/Alabama/Birmingham/?sort=asc#top">Birmingham</a>
               <a href="/root/">up</a>"#,
        )
}

fn ctx() -> RunContext {
    RunContext::new("job-1", 1, Utc::now())
}

fn sample(city_id: &str, jurisdiction: &str, path: &str) -> RedlightSampleEntry {
    RedlightSampleEntry {
        city_id: city_id.into(),
        jurisdiction: jurisdiction.into(),
        url: url(path),
        records: vec![RedlightSampleRecord {
            uid: Some(format!("{city_id}-sample")),
            address: "Sample Ave & Fallback St".into(),
            latitude: Some(1.0),
            longitude: Some(2.0),
        }],
    }
}

#[tokio::test]
async fn discovery_finds_exactly_one_city() {
    let pages = site();
    let cities = discover_cities(&pages, &cfg(), &RobotsRules::unrestricted(), &[url("/root/")]).await;
    assert_eq!(cities.len(), 1);
    assert_eq!(cities[0].city_id, "birmingham-al");
    assert_eq!(cities[0].jurisdiction, "Birmingham, AL");
    assert_eq!(cities[0].url, url("/root/Alabama/Birmingham/"));

    // leaf pages are discovered, not fetched
    assert!(!pages.requested().contains(&url("/root/Alabama/Birmingham/")));
}

#[tokio::test]
async fn robots_disallow_prevents_fetch() {
    let pages = site();
    let robots = RobotsRules::parse("User-agent: *\nDisallow: /root/Alabama/\n", "surveillancetrackerbot");
    let cities = discover_cities(&pages, &cfg(), &robots, &[url("/root/")]).await;
    assert!(cities.is_empty());
    assert_eq!(pages.requested(), vec![url("/root/")]);
}

#[tokio::test]
async fn unreachable_robots_leaves_crawl_unrestricted() {
    let pages = Arc::new(site().with_page(
        url("/root/Alabama/Birmingham/"),
        r#"<ul id="poi-list"><li data-lat="33.5" data-lng="-86.8" data-address="1st Ave &amp; 20th St">x</li></ul>"#,
    ));
    let connector = RedlightConnector::new(pages.clone() as Arc<dyn PageFetcher>, std::path::Path::new("/nonexistent"))
        .with_config(cfg())
        .with_samples(Vec::new());

    assert!(connector.robots_rules().await.is_unrestricted());
    let result = connector.collect(&ctx()).await;
    assert!(!result.is_fallback);
    assert_eq!(result.records.len(), 1);
    let record = &result.records[0];
    assert_eq!(record.category, Category::RedlightCamera);
    assert_eq!(record.jurisdiction, "Birmingham, AL");
    assert_eq!(record.address.as_deref(), Some("1st Ave & 20th St"));
    assert_eq!(result.source_revision.as_deref(), Some("job-1"));

    // robots.txt is requested once even across runs
    connector.collect(&ctx()).await;
    let robots_hits = pages.requested().iter().filter(|u| u.ends_with("/robots.txt")).count();
    assert_eq!(robots_hits, 1);
}

#[tokio::test]
async fn no_listings_is_not_substituted_but_errors_are() {
    let pages = Arc::new(
        site()
            .with_page(url("/root/Alabama/Birmingham/"), "<main>No listings at the moment.</main>"),
    );
    let connector = RedlightConnector::new(pages as Arc<dyn PageFetcher>, std::path::Path::new("/nonexistent"))
        .with_config(cfg())
        .with_samples(vec![
            sample("birmingham-al", "Birmingham, AL", "/root/Alabama/Birmingham/"),
            // not served by the fixture: fetch fails
            sample("mobile-al", "Mobile, AL", "/root/Alabama/Mobile/"),
        ]);

    let cities = connector.city_pages().await.to_vec();
    let ids: Vec<&str> = cities.iter().map(|c| c.city_id.as_str()).collect();
    assert_eq!(ids, vec!["birmingham-al", "mobile-al"]);

    assert_eq!(connector.collect_city(&cities[0]).await.unwrap(), CityOutcome::NoListings);
    assert!(connector.collect_city(&cities[1]).await.is_err());

    let result = connector.collect(&ctx()).await;
    let uids: Vec<&str> = result.records.iter().map(|r| r.uid.as_str()).collect();
    assert_eq!(uids, vec!["redlightcameralist-mobile-al-sample"]);
    assert!(!result.is_fallback, "one city answered live");
}

#[tokio::test]
async fn all_cities_failing_marks_result_as_fallback() {
    let pages = Arc::new(StaticPages::new());
    let connector = RedlightConnector::new(pages as Arc<dyn PageFetcher>, std::path::Path::new("/nonexistent"))
        .with_config(cfg())
        .with_samples(vec![sample("mobile-al", "Mobile, AL", "/root/Alabama/Mobile/")]);

    let result = connector.collect(&ctx()).await;
    assert!(result.is_fallback);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].latitude, Some(1.0));
}

#[tokio::test]
async fn pagination_is_followed_and_records_deduplicated() {
    let city_url = url("/root/Alabama/Birmingham/");
    let pages = Arc::new(
        site()
            .with_page(
                city_url.clone(),
                r#"<ul class="poi-list">
                    <li data-id="a" data-lat="1" data-lng="1" data-address="A St &amp; 1st Ave">a</li>
                   </ul>
                   <a href="page/2/">next</a>
                   <a href="/root/Alabama/">state</a>"#,
            )
            .with_page(
                url("/root/Alabama/Birmingham/page/2/"),
                r#"<ul class="poi-list">
                    <li data-id="a" data-lat="1" data-lng="1" data-address="A St &amp; 1st Ave">a</li>
                    <li data-id="b" data-lat="2" data-lng="2" data-address="B St &amp; 2nd Ave">b</li>
                   </ul>
                   <a href="/root/Alabama/Birmingham/">first</a>"#,
            ),
    );
    let connector = RedlightConnector::new(pages.clone() as Arc<dyn PageFetcher>, std::path::Path::new("/nonexistent"))
        .with_config(cfg())
        .with_samples(Vec::new());

    let result = connector.collect(&ctx()).await;
    let uids: Vec<&str> = result.records.iter().map(|r| r.uid.as_str()).collect();
    assert_eq!(uids, vec!["redlightcameralist-a", "redlightcameralist-b"]);
    let city_fetches = pages.requested().iter().filter(|u| u.starts_with(&city_url)).count();
    assert_eq!(city_fetches, 2);
}

#[tokio::test]
async fn no_cities_at_all_is_a_fallback_and_keeps_the_last_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let persistence = IngestPersistence::new(store.clone() as Arc<dyn IngestStore>);

    let earlier = RedlightConnector::new(Arc::new(StaticPages::new()) as Arc<dyn PageFetcher>, std::path::Path::new("/nonexistent"))
        .with_config(cfg())
        .with_samples(vec![sample("mobile-al", "Mobile, AL", "/root/Alabama/Mobile/")]);
    let first = persistence.persist(&earlier, earlier.collect(&ctx()).await).await.unwrap();
    assert!(first.is_created());

    // samples missing and discovery unreachable
    let bare = RedlightConnector::new(Arc::new(StaticPages::new()) as Arc<dyn PageFetcher>, std::path::Path::new("/nonexistent"))
        .with_config(cfg())
        .with_samples(Vec::new());
    let result = bare.collect(&ctx()).await;
    assert!(result.is_fallback);
    assert!(result.records.is_empty());

    let second = persistence.persist(&bare, result).await.unwrap();
    assert!(!second.is_created());
    assert_eq!(second.snapshot().id, first.snapshot().id);
    let source = store.get_source(bare.metadata().id.as_str()).await.unwrap().unwrap();
    assert_eq!(source.total_records, 1);
}
