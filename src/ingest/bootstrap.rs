// src/ingest/bootstrap.rs
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::connectors::{Connector, ConnectorRegistry};
use crate::store::IngestStore;

/// Register every connector and make sure its source row exists.
/// Called once by the entry point; a duplicate id aborts startup.
pub async fn bootstrap_connectors(
    connectors: Vec<Arc<dyn Connector>>,
    store: &dyn IngestStore,
) -> Result<ConnectorRegistry> {
    let mut registry = ConnectorRegistry::new();
    for connector in connectors {
        let meta = connector.metadata().clone();
        registry
            .register(connector)
            .with_context(|| format!("registering connector {}", meta.id))?;
        store
            .upsert_source(&meta)
            .await
            .with_context(|| format!("upserting source {}", meta.id))?;
        tracing::debug!(connector = %meta.id, kind = meta.kind.as_str(), "source row ensured");
    }
    Ok(registry)
}
