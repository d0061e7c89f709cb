// src/connectors/normalize.rs
//! Normalization helpers shared by the connectors: slugs, uid allocation,
//! category inference and text cleanup.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Category, NormalizedRecord};

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// Lower-case ASCII slug: every run of non-alphanumerics becomes one `-`.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Hands out unique uids within one result set.
///
/// The first occurrence of a base keeps it verbatim; later ones become
/// `base-2`, `base-3`, ... skipping any suffix already taken.
#[derive(Debug, Default)]
pub struct UidAllocator {
    occurrences: HashMap<String, usize>,
    taken: HashSet<String>,
}

impl UidAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the final uid and the zero-based duplicate index of `base`.
    pub fn allocate(&mut self, base: &str) -> (String, usize) {
        let occurrence = self.occurrences.entry(base.to_string()).or_insert(0);
        let index = *occurrence;
        *occurrence += 1;

        if index == 0 && self.taken.insert(base.to_string()) {
            return (base.to_string(), 0);
        }

        let mut n = index.max(1) + 1;
        loop {
            let candidate = format!("{base}-{n}");
            if self.taken.insert(candidate.clone()) {
                return (candidate, index);
            }
            n += 1;
        }
    }
}

/// Rewrite duplicate uids in place, preserving record order.
pub fn ensure_unique_uids(records: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
    let mut alloc = UidAllocator::new();
    records
        .into_iter()
        .map(|mut r| {
            let (uid, _) = alloc.allocate(&r.uid);
            r.uid = uid;
            r
        })
        .collect()
}

/// Map free text (technology, summary, title) to a category.
pub fn infer_category(text: &str) -> Category {
    let t = text.to_lowercase();
    if t.contains("drone") {
        Category::Drone
    } else if t.contains("license") {
        Category::LicensePlateReader
    } else if t.contains("facial") {
        Category::FacialRecognition
    } else if t.contains("camera") {
        Category::Camera
    } else {
        Category::Surveillance
    }
}

/// Decode entities, strip tags and collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).to_string();
    let stripped = RE_TAGS.replace_all(&decoded, " ");
    let out = stripped
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");
    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// First candidate that is non-empty after trimming.
pub fn pick_first<'a, I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

/// "123 Main St" from optional house number and street.
pub fn combine_street(house_number: Option<&str>, street: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [house_number, street]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(uid: &str) -> NormalizedRecord {
        NormalizedRecord {
            uid: uid.into(),
            source_id: "s".into(),
            jurisdiction: "J".into(),
            category: Category::Other,
            latitude: None,
            longitude: None,
            address: None,
            raw: Default::default(),
        }
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Birmingham AL"), "birmingham-al");
        assert_eq!(slugify("  Main St & 1st Ave!! "), "main-st-1st-ave");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn duplicate_uids_get_numbered_suffixes() {
        let out = ensure_unique_uids(vec![rec("a"), rec("b"), rec("a"), rec("a")]);
        let uids: Vec<_> = out.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, vec!["a", "b", "a-2", "a-3"]);
    }

    #[test]
    fn suffix_skips_uid_that_already_exists() {
        let out = ensure_unique_uids(vec![rec("a"), rec("a-2"), rec("a")]);
        let uids: Vec<_> = out.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, vec!["a", "a-2", "a-3"]);
    }

    #[test]
    fn allocator_reports_duplicate_index() {
        let mut alloc = UidAllocator::new();
        assert_eq!(alloc.allocate("x"), ("x".to_string(), 0));
        assert_eq!(alloc.allocate("x"), ("x-2".to_string(), 1));
        assert_eq!(alloc.allocate("x"), ("x-3".to_string(), 2));
    }

    #[test]
    fn category_inference_follows_keyword_priority() {
        assert_eq!(infer_category("Drone program"), Category::Drone);
        assert_eq!(
            infer_category("Automated License Plate Readers"),
            Category::LicensePlateReader
        );
        assert_eq!(infer_category("Face Recognition"), Category::Surveillance);
        assert_eq!(infer_category("Facial Recognition"), Category::FacialRecognition);
        assert_eq!(infer_category("Body-worn Cameras"), Category::Camera);
    }

    #[test]
    fn normalize_text_strips_markup() {
        assert_eq!(
            normalize_text("  <b>Police&nbsp;Dept</b>\n uses &ldquo;ALPR&rdquo; "),
            "Police Dept uses \"ALPR\""
        );
    }

    #[test]
    fn pick_first_and_combine_street() {
        assert_eq!(pick_first([None, Some("  "), Some(" x ")]), Some("x".into()));
        assert_eq!(combine_street(Some("12"), Some("Elm St")), Some("12 Elm St".into()));
        assert_eq!(combine_street(None, Some(" ")), None);
    }
}
