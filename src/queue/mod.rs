// src/queue/mod.rs
//! Persistent work queue for ingestion jobs: one-off jobs, cron-driven
//! recurring entries and the dispatcher that materializes them.

pub mod dispatcher;
pub mod memory;
pub mod postgres;
pub mod schedule;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dispatcher::run_dispatcher;
pub use memory::MemoryQueue;
pub use postgres::PgJobQueue;

/// Job name shared by every ingestion job and recurring entry.
pub const INGEST_JOB: &str = "ingest";

/// Failed jobs kept for inspection; older ones are dropped.
pub const FAILED_JOBS_RETAINED: usize = 50;

/// Recorded on jobs whose worker vanished mid-run.
pub const STALLED_JOB_ERROR: &str = "job stalled: worker did not finish it in time";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("job {job_id} belongs to job scheduler {repeat_job_key}")]
    OwnedByScheduler { job_id: String, repeat_job_key: String },

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid cron pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJobData {
    pub connector_id: String,
}

impl IngestJobData {
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Runnable now.
    Waiting,
    /// Runnable once `run_at` passes (scheduled or backing off).
    Delayed,
    Active,
    Failed,
}

impl JobState {
    pub const PENDING: [JobState; 2] = [JobState::Waiting, JobState::Delayed];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "delayed" => Some(JobState::Delayed),
            "active" => Some(JobState::Active),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Waiting | JobState::Delayed)
    }

    /// Pending state for a job due at `run_at`.
    pub fn pending_for(run_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if run_at > now {
            JobState::Delayed
        } else {
            JobState::Waiting
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub id: String,
    pub name: String,
    pub data: IngestJobData,
    pub state: JobState,
    /// Number of times the job has been claimed.
    pub attempts: u32,
    /// Set on instances materialized from a recurring entry.
    pub repeat_job_key: Option<String>,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// When the current active run was claimed; `None` unless active.
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A cron schedule that periodically materializes one job instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RepeatableJob {
    pub key: String,
    pub name: String,
    pub job_id: String,
    pub pattern: String,
    pub next_run_at: DateTime<Utc>,
}

/// `ingest:<jobId>:<pattern>`
pub fn repeatable_key(name: &str, job_id: &str, pattern: &str) -> String {
    format!("{name}:{job_id}:{pattern}")
}

/// Id of the instance a recurring entry materializes for one fire time.
pub fn repeat_instance_id(job_id: &str, fire_at: DateTime<Utc>) -> String {
    format!("repeat:{job_id}:{}", fire_at.timestamp_millis())
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a one-off job. An existing job with the same id is returned as is.
    async fn add(&self, name: &str, data: IngestJobData, job_id: &str, run_at: DateTime<Utc>) -> QueueResult<QueuedJob>;

    /// Create (or return the existing) recurring entry for `job_id` + `pattern`.
    async fn add_repeatable(&self, name: &str, job_id: &str, pattern: &str) -> QueueResult<RepeatableJob>;

    async fn repeatable_jobs(&self) -> QueueResult<Vec<RepeatableJob>>;

    /// Returns whether an entry was removed.
    async fn remove_repeatable_by_key(&self, key: &str) -> QueueResult<bool>;

    async fn jobs(&self, states: &[JobState]) -> QueueResult<Vec<QueuedJob>>;

    /// Remove one job. A pending instance whose recurring entry still exists
    /// fails with [`QueueError::OwnedByScheduler`].
    async fn remove_job(&self, job_id: &str) -> QueueResult<()>;

    /// Materialize one pending instance per recurring entry due at `now`
    /// and advance its next fire time.
    async fn promote_due_repeatables(&self, now: DateTime<Utc>) -> QueueResult<Vec<QueuedJob>>;

    /// Hand back jobs claimed at or before `claimed_before` that never
    /// completed or failed. Each goes back to delayed (due at `now`) while
    /// `attempts < max_attempts`, otherwise to failed. Returns the jobs touched.
    async fn recover_stalled(
        &self,
        now: DateTime<Utc>,
        claimed_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> QueueResult<Vec<QueuedJob>>;

    /// Take the oldest due pending job and mark it active.
    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<QueuedJob>>;

    /// Completed jobs are removed.
    async fn complete(&self, job_id: &str) -> QueueResult<()>;

    /// `retry_at` re-queues the job; `None` moves it to failed.
    async fn fail(&self, job_id: &str, error: &str, retry_at: Option<DateTime<Utc>>) -> QueueResult<()>;
}
