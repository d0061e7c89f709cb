// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_jobs_total", "Ingestion jobs processed, labeled by status.");
        describe_counter!("ingest_jobs_failed_total", "Ingestion jobs that ended in an error, labeled by reason.");
        describe_counter!("ingest_jobs_scheduled_total", "Job instances materialized from recurring entries.");
        describe_counter!("ingest_jobs_pruned_total", "Pending jobs removed because their connector is gone.");
        describe_counter!("ingest_jobs_stalled_total", "Active jobs handed back after their worker stopped responding, labeled by resulting state.");
        describe_counter!("ingest_records_total", "Records written into new snapshots.");
        describe_counter!("ingest_snapshots_total", "Snapshots written.");
        describe_counter!("ingest_fallback_total", "Sample data substituted for a failed fetch, labeled by scope.");
        describe_counter!(
            "ingest_snapshots_retained_total",
            "Fallback runs that kept the previous snapshot instead of writing a new one."
        );
        describe_counter!("crawl_pages_fetched_total", "Pages fetched by the crawler, labeled by phase.");
        describe_counter!("crawl_robots_blocked_total", "Crawl URLs skipped because robots.txt disallows them.");
        describe_counter!("geocode_requests_total", "Reverse geocode requests sent to the geocoder.");
        describe_counter!("geocode_errors_total", "Reverse geocode requests that failed.");
        describe_counter!("http_requests_total", "Outbound HTTP requests made by connectors, labeled by method.");
        describe_histogram!("ingest_parse_ms", "Feed parse duration in milliseconds.");
        describe_histogram!("ingest_collect_ms", "Connector collect duration in milliseconds.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if a recorder is
    /// already installed.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
