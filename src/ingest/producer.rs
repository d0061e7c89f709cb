// src/ingest/producer.rs
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;

use super::reconcile::{reconcile, DesiredSchedule, ScheduleDiff};
use crate::connectors::ConnectorMetadata;
use crate::queue::{IngestJobData, JobQueue, JobState, QueueError, QueueResult, QueuedJob, INGEST_JOB};

/// What a prune pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub recurring_removed: Vec<String>,
    pub pending_removed: Vec<String>,
}

/// Writes ingestion jobs and recurring schedules to the queue.
#[derive(Clone)]
pub struct IngestProducer {
    queue: Arc<dyn JobQueue>,
}

impl IngestProducer {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// One-off job with id `<connectorId>:<unix millis>`.
    pub async fn enqueue(&self, data: IngestJobData, delay: Option<Duration>) -> QueueResult<QueuedJob> {
        let now = Utc::now();
        let delay = delay
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(chrono::Duration::zero);
        let job_id = format!("{}:{}", data.connector_id, now.timestamp_millis());
        let job = self.queue.add(INGEST_JOB, data, &job_id, now + delay).await?;
        tracing::debug!(job_id = %job.id, connector = %job.data.connector_id, "enqueued ingest job");
        Ok(job)
    }

    /// Keep exactly one recurring entry for this connector with its declared
    /// schedule. An unchanged pattern leaves the queue untouched.
    pub async fn ensure_recurring(&self, meta: &ConnectorMetadata) -> QueueResult<ScheduleDiff> {
        let current: Vec<_> = self
            .queue
            .repeatable_jobs()
            .await?
            .into_iter()
            .filter(|e| e.job_id == meta.id)
            .collect();
        let diff = reconcile(&[DesiredSchedule::new(&meta.id, &meta.schedule)], &current);
        if diff.is_noop() {
            return Ok(diff);
        }

        for old in &diff.delete {
            tracing::info!(
                connector = %meta.id,
                from = %old.pattern,
                to = %meta.schedule,
                "updating recurring schedule"
            );
            self.queue.remove_repeatable_by_key(&old.key).await?;
        }
        for want in &diff.create {
            if let Err(e) = self
                .queue
                .add_repeatable(INGEST_JOB, &want.connector_id, &want.pattern)
                .await
            {
                tracing::error!(error = ?e, connector = %meta.id, "failed to schedule recurring ingest");
                return Err(e);
            }
            tracing::info!(connector = %meta.id, pattern = %want.pattern, "scheduled recurring ingest job");
        }
        Ok(diff)
    }

    /// Drop recurring entries for inactive connectors, then sweep pending job
    /// instances that still reference them. Individual removal failures are
    /// logged and skipped.
    pub async fn prune_stale_recurring(&self, valid: &HashSet<String>) -> QueueResult<PruneReport> {
        let mut report = PruneReport::default();

        let stale = self
            .queue
            .repeatable_jobs()
            .await?
            .into_iter()
            .filter(|e| e.name == INGEST_JOB && !valid.contains(&e.job_id));
        for entry in stale {
            match self.queue.remove_repeatable_by_key(&entry.key).await {
                Ok(_) => {
                    tracing::info!(connector = %entry.job_id, "removed stale recurring ingest job");
                    report.recurring_removed.push(entry.job_id);
                }
                Err(e) => {
                    tracing::error!(error = ?e, connector = %entry.job_id, "failed to remove stale ingest job")
                }
            }
        }

        for job in self.queue.jobs(&JobState::PENDING).await? {
            if job.name != INGEST_JOB || valid.contains(&job.data.connector_id) {
                continue;
            }
            let connector = job.data.connector_id.clone();
            match self.queue.remove_job(&job.id).await {
                Ok(()) => {}
                Err(QueueError::OwnedByScheduler { repeat_job_key, .. }) => {
                    let cleanup = async {
                        self.queue.remove_repeatable_by_key(&repeat_job_key).await?;
                        self.queue.remove_job(&job.id).await
                    };
                    if let Err(e) = cleanup.await {
                        tracing::error!(error = ?e, connector = %connector, "failed cleanup for pending ingest job");
                        continue;
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, connector = %connector, "failed to remove pending ingest job");
                    continue;
                }
            }
            counter!("ingest_jobs_pruned_total").increment(1);
            tracing::info!(connector = %connector, job_id = %job.id, "removed pending ingest job");
            report.pending_removed.push(job.id);
        }

        Ok(report)
    }
}
