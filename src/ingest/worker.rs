// src/ingest/worker.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::watch;

use super::persistence::{IngestPersistence, PersistOutcome};
use crate::config::WorkerConfig;
use crate::connectors::{ConnectorRegistry, RunContext};
use crate::dataset::DatasetExporter;
use crate::queue::{JobQueue, QueueResult, QueuedJob};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The registry and the queue disagree; retrying cannot help.
    #[error("unknown connector: {0}")]
    UnknownConnector(String),

    #[error("connector {connector} timed out after {timeout:?}")]
    Timeout { connector: String, timeout: Duration },

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("export failed: {0:#}")]
    Export(anyhow::Error),
}

impl WorkerError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WorkerError::UnknownConnector(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            WorkerError::UnknownConnector(_) => "unknown_connector",
            WorkerError::Timeout { .. } => "timeout",
            WorkerError::Persistence(_) => "persistence",
            WorkerError::Export(_) => "export",
        }
    }
}

/// Result of one `run_once` call that found a job.
#[derive(Debug)]
pub enum JobRun {
    Completed { job_id: String, outcome: PersistOutcome },
    Retrying { job_id: String, attempts: u32, error: WorkerError },
    Failed { job_id: String, attempts: u32, error: WorkerError },
}

/// Processes ingestion jobs one at a time.
pub struct IngestWorker {
    registry: Arc<ConnectorRegistry>,
    queue: Arc<dyn JobQueue>,
    persistence: IngestPersistence,
    exporter: Option<Arc<dyn DatasetExporter>>,
    cfg: WorkerConfig,
}

impl IngestWorker {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        queue: Arc<dyn JobQueue>,
        persistence: IngestPersistence,
        cfg: WorkerConfig,
    ) -> Self {
        crate::metrics::ensure_metrics_described();
        Self {
            registry,
            queue,
            persistence,
            exporter: None,
            cfg,
        }
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn DatasetExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Collect, persist, then export. Does not touch the queue.
    pub async fn process(&self, job: &QueuedJob) -> Result<PersistOutcome, WorkerError> {
        let connector_id = &job.data.connector_id;
        let connector = self
            .registry
            .get(connector_id)
            .ok_or_else(|| WorkerError::UnknownConnector(connector_id.clone()))?;

        let ctx = RunContext::new(job.id.clone(), job.attempts, job.run_at);
        let timeout = self.cfg.job_timeout();
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, connector.collect(&ctx))
            .await
            .map_err(|_| WorkerError::Timeout {
                connector: connector_id.clone(),
                timeout,
            })?;
        histogram!("ingest_collect_ms", "connector" => connector_id.clone())
            .record(started.elapsed().as_millis() as f64);
        tracing::info!(
            connector = %connector_id,
            job_id = %job.id,
            records = result.records.len(),
            fallback = result.is_fallback,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collect finished"
        );

        let outcome = self.persistence.persist(connector.as_ref(), result).await?;

        if let Some(exporter) = &self.exporter {
            exporter.write_latest_snapshot().await.map_err(WorkerError::Export)?;
        }
        Ok(outcome)
    }

    /// Hand jobs abandoned by a dead worker back to the queue.
    pub async fn recover_stalled(&self) -> QueueResult<usize> {
        let now = Utc::now();
        let Some(claimed_before) = chrono::Duration::from_std(self.cfg.stalled_after())
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
        else {
            return Ok(0);
        };
        let recovered = self
            .queue
            .recover_stalled(now, claimed_before, self.cfg.max_attempts)
            .await?;
        for job in &recovered {
            counter!("ingest_jobs_stalled_total", "state" => job.state.as_str()).increment(1);
            tracing::warn!(
                job_id = %job.id,
                connector = %job.data.connector_id,
                attempts = job.attempts,
                state = job.state.as_str(),
                "recovered stalled ingest job"
            );
        }
        Ok(recovered.len())
    }

    /// Claim one due job and settle it on the queue. `Ok(None)` when idle.
    pub async fn run_once(&self) -> QueueResult<Option<JobRun>> {
        self.recover_stalled().await?;
        let Some(job) = self.queue.claim_next(Utc::now()).await? else {
            return Ok(None);
        };

        match self.process(&job).await {
            Ok(outcome) => {
                self.queue.complete(&job.id).await?;
                counter!("ingest_jobs_total", "status" => "completed").increment(1);
                Ok(Some(JobRun::Completed { job_id: job.id, outcome }))
            }
            Err(error) => {
                counter!("ingest_jobs_failed_total", "reason" => error.kind()).increment(1);
                let retry = error.is_retryable() && job.attempts < self.cfg.max_attempts;
                if retry {
                    let backoff = chrono::Duration::seconds(self.cfg.backoff_secs as i64 * job.attempts as i64);
                    let retry_at = Utc::now() + backoff;
                    tracing::warn!(
                        error = %error,
                        job_id = %job.id,
                        connector = %job.data.connector_id,
                        attempts = job.attempts,
                        retry_at = %retry_at,
                        "ingest job failed; will retry"
                    );
                    self.queue.fail(&job.id, &error.to_string(), Some(retry_at)).await?;
                    counter!("ingest_jobs_total", "status" => "retrying").increment(1);
                    Ok(Some(JobRun::Retrying {
                        job_id: job.id,
                        attempts: job.attempts,
                        error,
                    }))
                } else {
                    tracing::error!(
                        error = %error,
                        job_id = %job.id,
                        connector = %job.data.connector_id,
                        attempts = job.attempts,
                        "ingest job failed"
                    );
                    self.queue.fail(&job.id, &error.to_string(), None).await?;
                    counter!("ingest_jobs_total", "status" => "failed").increment(1);
                    Ok(Some(JobRun::Failed {
                        job_id: job.id,
                        attempts: job.attempts,
                        error,
                    }))
                }
            }
        }
    }

    /// Poll the queue until `shutdown` flips to true. Queue errors are
    /// logged and the loop keeps going.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let idle = self.cfg.poll_interval();
        tracing::info!(poll_ms = idle.as_millis() as u64, "ingest worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let busy = match self.run_once().await {
                Ok(Some(_)) => true,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(error = ?e, "worker: queue error");
                    false
                }
            };
            if busy {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(idle) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("ingest worker stopped");
    }
}
