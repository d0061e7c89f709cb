// src/connectors/redlight/extract.rs
//! Record extraction from one city page.
//!
//! Extractors are pure (`&Html` in, records out) and tried in order until one
//! yields something. A page announcing "no listings" short-circuits to `None`.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map};

use super::discovery::CityPage;
use super::REDLIGHT_ID;
use crate::connectors::normalize::slugify;
use crate::connectors::{Category, NormalizedRecord};

pub type Extractor = fn(&Html, &CityPage) -> Vec<NormalizedRecord>;

/// Priority order of the extraction strategies.
pub const EXTRACTORS: &[(&str, Extractor)] = &[
    ("data_attributes", from_data_attributes),
    ("list_items", from_list_items),
    ("text_lines", from_text_lines),
];

const NO_LISTINGS_MESSAGE: &str = "no listings at the moment.";

const ADDRESS_ATTRS: &[&str] = &["data-addr", "data-address", "data-location", "data-title", "data-label"];
const ID_ATTRS: &[&str] = &["data-id", "data-uid", "data-key"];
const LAT_ATTRS: &[&str] = &["data-lat", "data-latitude", "data-y"];
const LON_ATTRS: &[&str] = &["data-lng", "data-long", "data-lon", "data-longitude", "data-x"];

fn selector(src: &str) -> Selector {
    Selector::parse(src).expect("static selector")
}

fn attr_selector(names: &[&str]) -> Selector {
    let src = names.iter().map(|n| format!("[{n}]")).collect::<Vec<_>>().join(",");
    selector(&src)
}

static COORD_ELEMENTS: Lazy<Selector> = Lazy::new(|| {
    selector("[data-lat],[data-lng],[data-long],[data-lon],[data-latitude],[data-longitude]")
});
static ADDRESS_SEL: Lazy<Selector> = Lazy::new(|| attr_selector(ADDRESS_ATTRS));
static ID_SEL: Lazy<Selector> = Lazy::new(|| attr_selector(ID_ATTRS));
static LAT_SEL: Lazy<Selector> = Lazy::new(|| attr_selector(LAT_ATTRS));
static LON_SEL: Lazy<Selector> = Lazy::new(|| attr_selector(LON_ATTRS));

static LIST_ITEM_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["#poi-list li", ".poi-list li", ".poi-results li", ".poiItem"]
        .into_iter()
        .map(selector)
        .collect()
});
static TEXT_BLOCK_SELECTORS: Lazy<Vec<Selector>> =
    Lazy::new(|| ["#poi-list", ".poi-list", "main"].into_iter().map(selector).collect());
static NO_LISTINGS_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["#poi-list", ".poi-list", "main", "body"]
        .into_iter()
        .map(selector)
        .collect()
});

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static RE_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*,\s*").expect("comma regex"));
static RE_RLC_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i),\s*red light camera\b").expect("rlc comma regex"));
static RE_RLC: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bred light camera\b").expect("rlc regex"));
static RE_MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("space regex"));
static RE_DOUBLE_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*,").expect("double comma regex"));
static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*$").expect("trailing comma regex"));

/// Run the extractor cascade over one page.
///
/// `None` means the page explicitly reports no listings; `Some(vec![])`
/// means nothing could be parsed.
pub fn parse_city_html(html: &str, city: &CityPage) -> Option<Vec<NormalizedRecord>> {
    let doc = Html::parse_document(html);
    if has_no_listings_message(&doc) {
        return None;
    }
    for (name, extractor) in EXTRACTORS {
        let records = extractor(&doc, city);
        if !records.is_empty() {
            tracing::trace!(city = %city.city_id, extractor = *name, count = records.len(), "extracted records");
            return Some(records);
        }
    }
    Some(Vec::new())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

pub fn has_no_listings_message(doc: &Html) -> bool {
    NO_LISTINGS_SELECTORS.iter().any(|sel| {
        doc.select(sel)
            .any(|el| element_text(el).to_lowercase().contains(NO_LISTINGS_MESSAGE))
    })
}

/// Elements carrying explicit coordinate attributes.
pub fn from_data_attributes(doc: &Html, city: &CityPage) -> Vec<NormalizedRecord> {
    let mut seen = HashSet::new();
    doc.select(&COORD_ELEMENTS)
        .enumerate()
        .filter_map(|(index, el)| record_from_element(el, city, index))
        .filter(|r| seen.insert(r.uid.clone()))
        .collect()
}

/// List items under the first candidate selector that matches anything,
/// minus navigation noise unless that would leave nothing.
pub fn from_list_items(doc: &Html, city: &CityPage) -> Vec<NormalizedRecord> {
    let Some(items) = LIST_ITEM_SELECTORS
        .iter()
        .map(|sel| doc.select(sel).collect::<Vec<_>>())
        .find(|found| !found.is_empty())
    else {
        return Vec::new();
    };

    let parsed: Vec<NormalizedRecord> = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, el)| record_from_element(el, city, index))
        .collect();

    let filtered: Vec<NormalizedRecord> = parsed.iter().filter(|r| !is_noise(r)).cloned().collect();
    if filtered.is_empty() {
        parsed
    } else {
        filtered
    }
}

/// Plain-text lines of the listing block that look like intersections.
pub fn from_text_lines(doc: &Html, city: &CityPage) -> Vec<NormalizedRecord> {
    let text = TEXT_BLOCK_SELECTORS
        .iter()
        .map(|sel| doc.select(sel).map(element_text).collect::<String>())
        .find(|t| !t.is_empty())
        .unwrap_or_default();

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && is_likely_intersection(line))
        .map(|line| build_record(city, line, &format!("fallback-{}", slugify(line)), None, None))
        .collect()
}

fn is_noise(record: &NormalizedRecord) -> bool {
    let address = record
        .address
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    address.is_empty()
        || address.starts_with('»')
        || address.contains("locations for")
        || address.contains("poi")
        || address == "list"
}

pub fn is_likely_intersection(value: &str) -> bool {
    let normalized = value.to_lowercase();
    if normalized.chars().count() < 4 {
        return false;
    }
    if normalized.contains('&')
        || normalized.contains(" at ")
        || normalized.contains(" / ")
        || normalized.contains('@')
    {
        return true;
    }
    normalized.contains(" and ") && normalized.contains(',')
}

/// First non-blank alias on the element itself, else on its first descendant
/// carrying any of the aliases.
fn find_attribute(el: ElementRef<'_>, names: &[&str], sel: &Selector) -> Option<String> {
    let own = |e: ElementRef<'_>| {
        names
            .iter()
            .filter_map(|n| e.value().attr(n))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    };
    own(el).or_else(|| el.select(sel).find(|d| d.id() != el.id()).and_then(own))
}

fn parse_coordinate(raw: Option<String>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn record_from_element(el: ElementRef<'_>, city: &CityPage, index: usize) -> Option<NormalizedRecord> {
    let address = find_attribute(el, ADDRESS_ATTRS, &ADDRESS_SEL)
        .unwrap_or_else(|| element_text(el).trim().to_string());
    if address.is_empty() {
        return None;
    }

    let city_slug = slugify(&city.city_id);
    let address_slug = slugify(&address);
    let suffix = find_attribute(el, ID_ATTRS, &ID_SEL)
        .map(|id| slugify(&id))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| {
            if address_slug.is_empty() {
                format!("{city_slug}-{index}")
            } else {
                format!("{city_slug}-{address_slug}")
            }
        });

    let latitude = parse_coordinate(find_attribute(el, LAT_ATTRS, &LAT_SEL));
    let longitude = parse_coordinate(find_attribute(el, LON_ATTRS, &LON_SEL));
    Some(build_record(city, &address, &suffix, latitude, longitude))
}

/// Normalize spacing, drop "red light camera" boilerplate and collapse a
/// jurisdiction suffix repeated at the end.
pub fn clean_address(address: &str, jurisdiction: &str) -> String {
    let value = RE_WS.replace_all(address, " ");
    let value = RE_COMMA.replace_all(&value, ", ");
    let value = value.trim();
    let value = RE_RLC_COMMA.replace_all(value, "");
    let value = RE_RLC.replace_all(&value, "");
    let value = RE_MULTI_SPACE.replace_all(&value, " ");
    let value = RE_DOUBLE_COMMA.replace_all(&value, ", ");
    let mut value = RE_TRAILING_COMMA.replace(&value, "").into_owned();

    let jurisdiction = jurisdiction.trim();
    if !jurisdiction.is_empty() {
        let suffix = format!(", {jurisdiction}");
        if let Ok(dup) = Regex::new(&format!("(?i)(?:{}){{2,}}$", regex::escape(&suffix))) {
            value = dup.replace(&value, regex::NoExpand(&suffix)).into_owned();
        }
    }
    value.trim().to_string()
}

pub fn build_record(
    city: &CityPage,
    address: &str,
    uid_suffix: &str,
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> NormalizedRecord {
    let mut raw = Map::new();
    raw.insert("cityId".into(), json!(city.city_id));
    NormalizedRecord {
        uid: format!("{REDLIGHT_ID}-{uid_suffix}"),
        source_id: REDLIGHT_ID.to_string(),
        jurisdiction: city.jurisdiction.clone(),
        category: Category::RedlightCamera,
        latitude: None,
        longitude: None,
        address: Some(clean_address(address, &city.jurisdiction)),
        raw,
    }
    .with_coordinates(latitude, longitude)
}
