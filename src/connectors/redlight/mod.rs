// src/connectors/redlight/mod.rs
//! Red-light camera list crawler: discovery of city pages, per-city
//! pagination with the extractor cascade, and per-city sample fallback.

pub mod discovery;
pub mod extract;
pub mod robots;
pub mod states;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::fetch::PageFetcher;
use super::normalize::{ensure_unique_uids, slugify};
use super::samples::{load_samples, REDLIGHT_SAMPLE};
use super::{Connector, ConnectorKind, ConnectorMetadata, ConnectorResult, NormalizedRecord, RunContext};

pub use discovery::{CityPage, CrawlConfig};
use discovery::{discover_cities, extract_hrefs, normalize_link};
use robots::{agent_token, RobotsRules};

pub const REDLIGHT_ID: &str = "redlightcameralist";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedlightSampleRecord {
    pub uid: Option<String>,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Bundled offline data for one city; also seeds the static city list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedlightSampleEntry {
    pub city_id: String,
    pub jurisdiction: String,
    pub url: String,
    #[serde(default)]
    pub records: Vec<RedlightSampleRecord>,
}

impl RedlightSampleEntry {
    fn page(&self) -> CityPage {
        CityPage {
            city_id: self.city_id.clone(),
            jurisdiction: self.jurisdiction.clone(),
            url: self.url.clone(),
        }
    }
}

/// What one city produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CityOutcome {
    Records(Vec<NormalizedRecord>),
    /// Every fetched page said "no listings"; no fallback.
    NoListings,
}

pub struct RedlightConnector {
    metadata: ConnectorMetadata,
    fetcher: Arc<dyn PageFetcher>,
    cfg: CrawlConfig,
    roots: Vec<String>,
    static_cities: Vec<CityPage>,
    fallback: HashMap<String, RedlightSampleEntry>,
    robots: OnceCell<RobotsRules>,
    cities: OnceCell<Vec<CityPage>>,
}

impl RedlightConnector {
    pub fn new(fetcher: Arc<dyn PageFetcher>, samples_dir: &Path) -> Self {
        let cfg = CrawlConfig::default();
        Self {
            metadata: ConnectorMetadata {
                id: REDLIGHT_ID.to_string(),
                title: "Red Light Cameras".to_string(),
                kind: ConnectorKind::Crawl,
                schedule: "0 0 * * *".to_string(),
                homepage: Some("https://www.redlightcameralist.com/".to_string()),
                description: Some(
                    "Scrapes public intersection data across configured jurisdictions.".to_string(),
                ),
            },
            fetcher,
            roots: vec![cfg.root_url()],
            cfg,
            static_cities: Vec::new(),
            fallback: HashMap::new(),
            robots: OnceCell::new(),
            cities: OnceCell::new(),
        }
        .with_samples(load_samples(samples_dir, REDLIGHT_SAMPLE))
    }

    /// Replace crawl bounds; discovery roots follow the new root URL.
    pub fn with_config(mut self, cfg: CrawlConfig) -> Self {
        self.roots = vec![cfg.root_url()];
        self.cfg = cfg;
        self
    }

    pub fn with_samples(mut self, samples: Vec<RedlightSampleEntry>) -> Self {
        self.static_cities = samples.iter().map(RedlightSampleEntry::page).collect();
        self.fallback = samples.into_iter().map(|e| (e.city_id.clone(), e)).collect();
        self
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.cfg
    }

    /// robots.txt, fetched once; any failure means unrestricted.
    pub async fn robots_rules(&self) -> &RobotsRules {
        self.robots
            .get_or_init(|| async {
                let url = self.cfg.robots_url();
                match self.fetcher.get_text(&url).await {
                    Ok(body) => {
                        let rules = RobotsRules::parse(&body, &agent_token(&self.cfg.user_agent));
                        tracing::debug!(rules = rules.rules().len(), "loaded robots.txt rules");
                        rules
                    }
                    Err(e) => {
                        tracing::debug!(error = ?e, url = %url, "unable to load robots.txt; continuing without restrictions");
                        RobotsRules::unrestricted()
                    }
                }
            })
            .await
    }

    /// Static sample cities overlaid with discovered ones (discovered wins),
    /// sorted by jurisdiction. Computed once per connector.
    pub async fn city_pages(&self) -> &[CityPage] {
        self.cities
            .get_or_init(|| async {
                let robots = self.robots_rules().await;
                let discovered = discover_cities(self.fetcher.as_ref(), &self.cfg, robots, &self.roots).await;
                if discovered.is_empty() {
                    tracing::warn!(connector = REDLIGHT_ID, "discovery found no cities; using static city list");
                }
                merge_cities(&self.static_cities, discovered)
            })
            .await
    }

    /// Crawl one city's pagination and run the extractors on every page.
    pub async fn collect_city(&self, city: &CityPage) -> anyhow::Result<CityOutcome> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut enqueued: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([city.url.clone()]);
        let mut deduped: BTreeMap<String, NormalizedRecord> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut saw_no_listings = false;
        let mut fetched = 0usize;
        let mut last_error: Option<anyhow::Error> = None;

        while visited.len() < self.cfg.max_city_pages {
            let Some(page_url) = queue.pop_front() else {
                break;
            };
            if !visited.insert(page_url.clone()) {
                continue;
            }

            let html = match self.fetcher.get_text(&page_url).await {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(error = ?e, city = %city.city_id, url = %page_url, "failed to fetch city page");
                    last_error = Some(e);
                    continue;
                }
            };
            fetched += 1;
            counter!("crawl_pages_fetched_total", "phase" => "city").increment(1);

            match extract::parse_city_html(&html, city) {
                None => saw_no_listings = true,
                Some(records) => {
                    for record in records {
                        if !deduped.contains_key(&record.uid) {
                            order.push(record.uid.clone());
                        }
                        deduped.insert(record.uid.clone(), record);
                    }
                }
            }

            for next in pagination_urls(&html, city, &self.cfg.host) {
                if !visited.contains(&next)
                    && !enqueued.contains(&next)
                    && queue.len() + visited.len() < self.cfg.max_city_pages
                {
                    enqueued.insert(next.clone());
                    queue.push_back(next);
                }
            }
        }

        if !deduped.is_empty() {
            let records = order.into_iter().filter_map(|uid| deduped.remove(&uid)).collect();
            return Ok(CityOutcome::Records(records));
        }
        if saw_no_listings {
            return Ok(CityOutcome::NoListings);
        }
        match last_error {
            Some(e) if fetched == 0 => Err(e),
            _ => Ok(CityOutcome::Records(Vec::new())),
        }
    }

    /// Bundled records for one city, or nothing if it has no sample.
    pub fn fallback_records(&self, city: &CityPage) -> Vec<NormalizedRecord> {
        let Some(entry) = self.fallback.get(&city.city_id) else {
            tracing::warn!(city = %city.city_id, "no fallback data configured");
            return Vec::new();
        };
        counter!("ingest_fallback_total", "connector" => REDLIGHT_ID, "scope" => "city").increment(1);
        entry
            .records
            .iter()
            .map(|r| {
                let suffix = r
                    .uid
                    .clone()
                    .unwrap_or_else(|| slugify(&format!("{}-{}", city.city_id, r.address)));
                extract::build_record(city, &r.address, &suffix, r.latitude, r.longitude)
            })
            .collect()
    }
}

/// Links on a city page that continue that city's listing.
pub fn pagination_urls(html: &str, city: &CityPage, host: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    extract_hrefs(html)
        .into_iter()
        .filter_map(|href| normalize_link(&city.url, &href, host))
        .filter(|url| url.starts_with(&city.url) && *url != city.url)
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

pub fn merge_cities(static_cities: &[CityPage], discovered: Vec<CityPage>) -> Vec<CityPage> {
    let mut merged: HashMap<String, CityPage> = static_cities
        .iter()
        .map(|c| (c.city_id.clone(), c.clone()))
        .collect();
    for city in discovered {
        merged.insert(city.city_id.clone(), city);
    }
    let mut out: Vec<CityPage> = merged.into_values().collect();
    out.sort_by(|a, b| {
        a.jurisdiction
            .to_lowercase()
            .cmp(&b.jurisdiction.to_lowercase())
            .then_with(|| a.city_id.cmp(&b.city_id))
    });
    out
}

#[async_trait]
impl Connector for RedlightConnector {
    fn metadata(&self) -> &ConnectorMetadata {
        &self.metadata
    }

    async fn collect(&self, ctx: &RunContext) -> ConnectorResult {
        let cities = self.city_pages().await;
        if cities.is_empty() {
            tracing::warn!(connector = REDLIGHT_ID, "no city configurations discovered or loaded");
            counter!("ingest_fallback_total", "connector" => REDLIGHT_ID, "scope" => "source").increment(1);
            return ConnectorResult::fallback(Vec::new(), Some(ctx.job_id.clone()));
        }
        tracing::debug!(connector = REDLIGHT_ID, cities = cities.len(), "scraping cities");

        let mut records = Vec::new();
        let mut live_cities = 0usize;
        let mut empty_cities = 0usize;
        for city in cities {
            match self.collect_city(city).await {
                Ok(CityOutcome::NoListings) => {
                    tracing::debug!(city = %city.city_id, "page reports no listings; skipping");
                    empty_cities += 1;
                }
                Ok(CityOutcome::Records(found)) if !found.is_empty() => {
                    live_cities += 1;
                    records.extend(found);
                }
                Ok(CityOutcome::Records(_)) => {
                    tracing::warn!(city = %city.city_id, "parsed zero intersections; using fallback sample");
                    records.extend(self.fallback_records(city));
                }
                Err(e) => {
                    tracing::warn!(error = ?e, city = %city.city_id, "failed to fetch city; using fallback sample");
                    records.extend(self.fallback_records(city));
                }
            }
        }

        let records = ensure_unique_uids(records);
        let revision = Some(ctx.job_id.clone());
        if live_cities == 0 && empty_cities == 0 {
            ConnectorResult::fallback(records, revision)
        } else {
            ConnectorResult::live(records, revision)
        }
    }
}
