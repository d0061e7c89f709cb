// src/ingest/orchestrator.rs
use std::collections::HashSet;
use std::sync::Arc;

use super::producer::{IngestProducer, PruneReport};
use crate::connectors::ConnectorRegistry;
use crate::queue::{IngestJobData, QueueResult};

/// Summary of one schedule pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub replaced: Vec<String>,
    pub unchanged: Vec<String>,
    pub pruned: PruneReport,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.replaced.is_empty()
            && self.pruned.recurring_removed.is_empty()
            && self.pruned.pending_removed.is_empty()
    }
}

/// Keeps the queue's recurring schedules in step with the registry.
pub struct IngestOrchestrator {
    registry: Arc<ConnectorRegistry>,
    producer: IngestProducer,
}

impl IngestOrchestrator {
    pub fn new(registry: Arc<ConnectorRegistry>, producer: IngestProducer) -> Self {
        Self { registry, producer }
    }

    /// Prune stale schedules and pending jobs, then ensure one recurring
    /// entry per registered connector. Safe to rerun.
    pub async fn ensure_schedules(&self) -> QueueResult<ReconcileReport> {
        let metadata = self.registry.metadata();
        if metadata.is_empty() {
            tracing::warn!("no connectors registered; nothing to schedule");
            return Ok(ReconcileReport::default());
        }

        let active: HashSet<String> = metadata.iter().map(|m| m.id.clone()).collect();
        let mut report = ReconcileReport {
            pruned: self.producer.prune_stale_recurring(&active).await?,
            ..Default::default()
        };

        for meta in &metadata {
            let diff = self.producer.ensure_recurring(meta).await?;
            if diff.is_noop() {
                report.unchanged.push(meta.id.clone());
            } else if diff.delete.is_empty() {
                report.created.push(meta.id.clone());
            } else {
                report.replaced.push(meta.id.clone());
            }
        }

        tracing::info!(
            created = report.created.len(),
            replaced = report.replaced.len(),
            unchanged = report.unchanged.len(),
            pruned = report.pruned.recurring_removed.len() + report.pruned.pending_removed.len(),
            "ingest schedules reconciled"
        );
        Ok(report)
    }

    /// Queue one immediate run per registered connector.
    pub async fn enqueue_all(&self) -> QueueResult<usize> {
        let mut n = 0;
        for id in self.registry.ids() {
            self.producer.enqueue(IngestJobData::new(id), None).await?;
            n += 1;
        }
        Ok(n)
    }
}
