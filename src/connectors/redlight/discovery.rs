// src/connectors/redlight/discovery.rs
//! Bounded breadth-first discovery of per-city pages below the index root.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use metrics::counter;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use super::robots::RobotsRules;
use super::states::state_abbreviation;
use crate::connectors::fetch::PageFetcher;
use crate::connectors::normalize::slugify;

pub const REDLIGHT_HOST: &str = "www.redlightcameralist.com";
pub const REDLIGHT_ORIGIN: &str = "https://www.redlightcameralist.com";
pub const REDLIGHT_ROOT_PATH: &str = "/poi/United-States-of-America/";
pub const DEFAULT_USER_AGENT: &str =
    "SurveillanceTrackerBot/1.0 (+https://github.com/chand/aintivirus-survaillance-tracker)";

static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("anchor selector"));

/// Crawl bounds and site layout.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Scheme + host, no trailing slash.
    pub origin: String,
    pub host: String,
    /// Index root; leaf city pages sit exactly two segments below it.
    pub root_path: String,
    pub robots_path: String,
    pub request_delay: Duration,
    pub max_depth: usize,
    pub max_pages: usize,
    pub max_city_pages: usize,
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            origin: REDLIGHT_ORIGIN.to_string(),
            host: REDLIGHT_HOST.to_string(),
            root_path: REDLIGHT_ROOT_PATH.to_string(),
            robots_path: "/robots.txt".to_string(),
            request_delay: Duration::from_millis(200),
            max_depth: 2,
            max_pages: 400,
            max_city_pages: 25,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlConfig {
    pub fn root_url(&self) -> String {
        format!("{}{}", self.origin, ensure_trailing_slash(&self.root_path))
    }

    pub fn robots_url(&self) -> String {
        format!("{}{}", self.origin, self.robots_path)
    }

    fn root_segments(&self) -> Vec<&str> {
        segments(&self.root_path)
    }
}

/// A per-jurisdiction listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityPage {
    pub city_id: String,
    pub jurisdiction: String,
    pub url: String,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn ensure_trailing_slash(value: &str) -> String {
    if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    }
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `New-York` -> `New York`, `st.%20louis` -> `St. Louis`.
pub fn decode_segment(segment: &str) -> String {
    let spaced = segment.replace('-', " ");
    let decoded = urlencoding::decode(&spaced)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| spaced.clone());
    title_case(&decoded)
}

/// Resolve `href` against `base` and normalize it to `origin + path/`.
/// Off-host links, fragments, `mailto:`/`tel:`/`javascript:` targets are
/// dropped; query strings are removed.
pub fn normalize_link(base: &str, href: &str, host: &str) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("mailto:") || lower.starts_with("tel:") || lower.starts_with("javascript:") {
        return None;
    }

    let mut resolved = Url::parse(base).ok()?.join(trimmed).ok()?;
    if resolved.host_str() != Some(host) {
        return None;
    }
    resolved.set_fragment(None);
    resolved.set_query(None);
    Some(ensure_trailing_slash(&format!(
        "{}{}",
        resolved.origin().ascii_serialization(),
        resolved.path()
    )))
}

/// Classify a URL as a leaf city page: `<root>/<state>/<city>/`.
pub fn parse_city_url(url: &str, cfg: &CrawlConfig) -> Option<CityPage> {
    let parsed = Url::parse(url).ok()?;
    if parsed.host_str() != Some(cfg.host.as_str()) {
        return None;
    }
    let root = cfg.root_segments();
    let segs = segments(parsed.path());
    if segs.len() != root.len() + 2 || !segs.starts_with(&root) {
        return None;
    }

    let state_name = decode_segment(segs[root.len()]);
    let city_name = decode_segment(segs[root.len() + 1]);
    let suffix = state_abbreviation(&state_name).unwrap_or(state_name.as_str());

    Some(CityPage {
        city_id: slugify(&format!("{city_name} {suffix}")),
        jurisdiction: format!("{city_name}, {suffix}"),
        url: ensure_trailing_slash(&format!(
            "{}{}",
            parsed.origin().ascii_serialization(),
            parsed.path()
        )),
    })
}

/// Intermediate index pages: inside the root prefix, not a city, at most one
/// segment below the root.
pub fn should_follow(url: &str, cfg: &CrawlConfig) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if parsed.host_str() != Some(cfg.host.as_str()) {
        return false;
    }
    if !parsed.path().starts_with(&ensure_trailing_slash(&cfg.root_path)) {
        return false;
    }
    if parse_city_url(url, cfg).is_some() {
        return false;
    }
    segments(parsed.path()).len() <= cfg.root_segments().len() + 1
}

/// All `href` values of anchors in document order.
pub fn extract_hrefs(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(&ANCHORS)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

fn url_path(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| u.path().to_string())
}

/// Breadth-first crawl from `roots`, bounded by depth and page count.
/// Fetch failures skip the page; robots-disallowed URLs are never fetched.
pub async fn discover_cities(
    fetcher: &dyn PageFetcher,
    cfg: &CrawlConfig,
    robots: &RobotsRules,
    roots: &[String],
) -> Vec<CityPage> {
    let mut discovered: Vec<CityPage> = Vec::new();
    let mut discovered_ids: HashMap<String, usize> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut enqueued: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();

    for root in roots {
        if enqueued.insert(root.clone()) {
            queue.push_back((root.clone(), 0));
        }
    }

    let mut pages_processed = 0usize;
    while pages_processed < cfg.max_pages {
        let Some((current, depth)) = queue.pop_front() else {
            break;
        };
        if !visited.insert(current.clone()) {
            continue;
        }

        if let Some(path) = url_path(&current) {
            if !robots.is_allowed(&path) {
                counter!("crawl_robots_blocked_total").increment(1);
                tracing::debug!(url = %current, "skipping discovery url due to robots.txt");
                continue;
            }
        }

        if pages_processed > 0 && !cfg.request_delay.is_zero() {
            tokio::time::sleep(cfg.request_delay).await;
        }

        let html = match fetcher.get_text(&current).await {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(error = ?e, url = %current, "failed to fetch discovery url");
                continue;
            }
        };
        pages_processed += 1;
        counter!("crawl_pages_fetched_total", "phase" => "discovery").increment(1);

        for href in extract_hrefs(&html) {
            let Some(link) = normalize_link(&current, &href, &cfg.host) else {
                continue;
            };

            if let Some(city) = parse_city_url(&link, cfg) {
                if !discovered_ids.contains_key(&city.city_id) {
                    discovered_ids.insert(city.city_id.clone(), discovered.len());
                    discovered.push(city);
                }
                continue;
            }

            if depth + 1 > cfg.max_depth || !should_follow(&link, cfg) {
                continue;
            }
            if !visited.contains(&link) && enqueued.insert(link.clone()) {
                queue.push_back((link, depth + 1));
            }
        }
    }

    if pages_processed >= cfg.max_pages {
        tracing::warn!(limit = cfg.max_pages, "reached discovery page limit");
    }
    if !discovered.is_empty() {
        tracing::debug!(count = discovered.len(), "discovered city pages via crawl");
    }
    discovered
}
