//! Surveillance ingest service: binary entrypoint.
//! Wires connectors, store, queue, dispatcher, worker and the read API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use surveillance_ingest::api::{self, AppState};
use surveillance_ingest::config::EngineConfig;
use surveillance_ingest::connectors::atlas::AtlasConnector;
use surveillance_ingest::connectors::fetch::{HttpFetcher, PageFetcher};
use surveillance_ingest::connectors::overpass::OverpassConnector;
use surveillance_ingest::connectors::redlight::{discovery::DEFAULT_USER_AGENT, RedlightConnector};
use surveillance_ingest::connectors::Connector;
use surveillance_ingest::dataset::{DatasetExporter, DatasetService, JsonExporter};
use surveillance_ingest::geocoding::nominatim::NominatimGeocoder;
use surveillance_ingest::ingest::{
    bootstrap_connectors, IngestOrchestrator, IngestPersistence, IngestProducer, IngestWorker,
};
use surveillance_ingest::metrics::Metrics;
use surveillance_ingest::queue::{self, JobQueue, MemoryQueue, PgJobQueue};
use surveillance_ingest::store::{IngestStore, MemoryStore, PgStore};

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const DISPATCH_TICK: Duration = Duration::from_secs(5);

/// `RUST_LOG` filter, default `surveillance_ingest=info,warn`;
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("surveillance_ingest=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn open_backends(cfg: &EngineConfig) -> Result<(Arc<dyn IngestStore>, Arc<dyn JobQueue>)> {
    match &cfg.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await.context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            let queue = PgJobQueue::new(store.pool().clone());
            tracing::info!("using PostgreSQL store and queue");
            Ok((Arc::new(store), Arc::new(queue)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store and queue");
            Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryQueue::new())))
        }
    }
}

fn build_connectors(cfg: &EngineConfig) -> Result<Vec<Arc<dyn Connector>>> {
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(DEFAULT_USER_AGENT, FETCH_TIMEOUT)?);
    let geocoder = Arc::new(NominatimGeocoder::new(&cfg.geocoding)?);
    let samples = cfg.samples_dir.as_path();

    Ok(vec![
        Arc::new(AtlasConnector::new(fetcher.clone(), samples)),
        Arc::new(OverpassConnector::new(fetcher.clone(), geocoder, samples)),
        Arc::new(RedlightConnector::new(fetcher, samples)),
    ])
}

async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutdown requested");
    let _ = tx.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = Metrics::init()?;
    let cfg = EngineConfig::load()?;
    tracing::info!(bind = %cfg.bind_addr, samples = %cfg.samples_dir.display(), exports = %cfg.export_dir.display(), "engine config loaded");

    let (store, queue) = open_backends(&cfg).await?;
    let registry = Arc::new(bootstrap_connectors(build_connectors(&cfg)?, store.as_ref()).await?);

    let producer = IngestProducer::new(queue.clone());
    let orchestrator = IngestOrchestrator::new(registry.clone(), producer);
    orchestrator.ensure_schedules().await?;
    if cfg.run_on_startup {
        let n = orchestrator.enqueue_all().await?;
        tracing::info!(jobs = n, "queued startup ingestion");
    }

    let dataset = DatasetService::new(store.clone());
    let exporter = Arc::new(JsonExporter::new(cfg.export_dir.clone(), dataset.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = tokio::spawn(queue::run_dispatcher(queue.clone(), DISPATCH_TICK, shutdown_rx.clone()));
    let worker = IngestWorker::new(
        registry.clone(),
        queue.clone(),
        IngestPersistence::new(store.clone()),
        cfg.worker.clone(),
    )
    .with_exporter(exporter.clone() as Arc<dyn DatasetExporter>);
    let worker = tokio::spawn(worker.run(shutdown_rx.clone()));

    let router = api::create_router(AppState::new(dataset).with_exporter(exporter)).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "http server listening");

    let mut server_shutdown = shutdown_rx.clone();
    tokio::spawn(shutdown_signal(shutdown_tx));
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("http server")?;

    let _ = tokio::join!(dispatcher, worker);
    Ok(())
}
