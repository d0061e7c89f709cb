// tests/common/mod.rs
//
// Shared fixtures for the connector integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use surveillance_ingest::connectors::fetch::PageFetcher;

/// Serves canned bodies keyed by URL; anything else is an error.
/// Records every requested URL so tests can assert what was (not) fetched.
#[derive(Default)]
pub struct StaticPages {
    pages: HashMap<String, String>,
    pub requests: Mutex<Vec<String>>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requests.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn serve(&self, url: &str) -> Result<String> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(url.to_string());
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("unexpected url: {url}"))
    }
}

#[async_trait]
impl PageFetcher for StaticPages {
    async fn get_text(&self, url: &str) -> Result<String> {
        self.serve(url)
    }

    async fn post_form(&self, url: &str, _form: &[(&str, &str)]) -> Result<String> {
        self.serve(url)
    }
}
