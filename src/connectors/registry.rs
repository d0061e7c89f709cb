// src/connectors/registry.rs
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::{Connector, ConnectorMetadata};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connector with id \"{0}\" is already registered")]
    Duplicate(String),
}

/// Live set of connectors keyed by id, in registration order.
///
/// Populated once by the startup routine, then shared read-only with the
/// orchestrator and workers.
#[derive(Default)]
pub struct ConnectorRegistry {
    order: Vec<Arc<dyn Connector>>,
    by_id: HashMap<String, usize>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Result<(), RegistryError> {
        let id = connector.metadata().id.clone();
        if self.by_id.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        tracing::info!(
            connector = %id,
            title = %connector.metadata().title,
            "registering connector"
        );
        self.by_id.insert(id, self.order.len());
        self.order.push(connector);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.by_id.get(id).map(|&i| Arc::clone(&self.order[i]))
    }

    pub fn list(&self) -> Vec<Arc<dyn Connector>> {
        self.order.clone()
    }

    pub fn metadata(&self) -> Vec<ConnectorMetadata> {
        self.order.iter().map(|c| c.metadata().clone()).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.iter().map(|c| c.metadata().id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
