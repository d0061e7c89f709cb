// src/connectors/fetch.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;

/// Minimal HTTP surface the connectors need. Non-2xx responses are errors.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String>;

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String>;
}

/// `reqwest`-backed fetcher with a fixed user agent and timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url} non-2xx"))?;
        counter!("http_requests_total", "method" => "GET").increment(1);
        resp.text().await.with_context(|| format!("GET {url} body"))
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String> {
        let resp = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url} non-2xx"))?;
        counter!("http_requests_total", "method" => "POST").increment(1);
        resp.text().await.with_context(|| format!("POST {url} body"))
    }
}
