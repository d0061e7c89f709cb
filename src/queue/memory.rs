// src/queue/memory.rs
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::schedule::next_fire;
use super::{
    repeat_instance_id, repeatable_key, IngestJobData, JobQueue, JobState, QueueError, QueueResult,
    QueuedJob, RepeatableJob, FAILED_JOBS_RETAINED, STALLED_JOB_ERROR,
};

#[derive(Default)]
struct Inner {
    /// Insertion order doubles as FIFO tie-break.
    jobs: Vec<QueuedJob>,
    repeatables: BTreeMap<String, RepeatableJob>,
}

impl Inner {
    fn position(&self, job_id: &str) -> Option<usize> {
        self.jobs.iter().position(|j| j.id == job_id)
    }

    fn trim_failed(&mut self) {
        let failed = self.jobs.iter().filter(|j| j.state == JobState::Failed).count();
        let mut excess = failed.saturating_sub(FAILED_JOBS_RETAINED);
        self.jobs.retain(|j| {
            if excess > 0 && j.state == JobState::Failed {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

/// In-process queue for single-node runs and tests.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn add(&self, name: &str, data: IngestJobData, job_id: &str, run_at: DateTime<Utc>) -> QueueResult<QueuedJob> {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner.position(job_id) {
            return Ok(inner.jobs[pos].clone());
        }
        let now = Utc::now();
        let job = QueuedJob {
            id: job_id.to_string(),
            name: name.to_string(),
            data,
            state: JobState::pending_for(run_at, now),
            attempts: 0,
            repeat_job_key: None,
            run_at,
            created_at: now,
            claimed_at: None,
            last_error: None,
        };
        inner.jobs.push(job.clone());
        Ok(job)
    }

    async fn add_repeatable(&self, name: &str, job_id: &str, pattern: &str) -> QueueResult<RepeatableJob> {
        let next_run_at = next_fire(pattern, Utc::now())?;
        let key = repeatable_key(name, job_id, pattern);
        let mut inner = self.inner.lock().await;
        let entry = inner.repeatables.entry(key.clone()).or_insert_with(|| RepeatableJob {
            key,
            name: name.to_string(),
            job_id: job_id.to_string(),
            pattern: pattern.to_string(),
            next_run_at,
        });
        Ok(entry.clone())
    }

    async fn repeatable_jobs(&self) -> QueueResult<Vec<RepeatableJob>> {
        Ok(self.inner.lock().await.repeatables.values().cloned().collect())
    }

    async fn remove_repeatable_by_key(&self, key: &str) -> QueueResult<bool> {
        Ok(self.inner.lock().await.repeatables.remove(key).is_some())
    }

    async fn jobs(&self, states: &[JobState]) -> QueueResult<Vec<QueuedJob>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .iter()
            .filter(|j| states.contains(&j.state))
            .cloned()
            .collect())
    }

    async fn remove_job(&self, job_id: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let pos = inner
            .position(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        let job = &inner.jobs[pos];
        if let Some(key) = job.repeat_job_key.as_deref() {
            if job.state.is_pending() && inner.repeatables.contains_key(key) {
                return Err(QueueError::OwnedByScheduler {
                    job_id: job_id.to_string(),
                    repeat_job_key: key.to_string(),
                });
            }
        }
        inner.jobs.remove(pos);
        Ok(())
    }

    async fn promote_due_repeatables(&self, now: DateTime<Utc>) -> QueueResult<Vec<QueuedJob>> {
        let mut inner = self.inner.lock().await;
        let due: Vec<RepeatableJob> = inner
            .repeatables
            .values()
            .filter(|r| r.next_run_at <= now)
            .cloned()
            .collect();

        let mut created = Vec::new();
        for rep in due {
            let id = repeat_instance_id(&rep.job_id, rep.next_run_at);
            if inner.position(&id).is_none() {
                let job = QueuedJob {
                    id,
                    name: rep.name.clone(),
                    data: IngestJobData::new(rep.job_id.clone()),
                    state: JobState::Waiting,
                    attempts: 0,
                    repeat_job_key: Some(rep.key.clone()),
                    run_at: rep.next_run_at,
                    created_at: now,
                    claimed_at: None,
                    last_error: None,
                };
                inner.jobs.push(job.clone());
                created.push(job);
            }
            let next = next_fire(&rep.pattern, now)?;
            if let Some(entry) = inner.repeatables.get_mut(&rep.key) {
                entry.next_run_at = next;
            }
        }
        Ok(created)
    }

    async fn recover_stalled(
        &self,
        now: DateTime<Utc>,
        claimed_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> QueueResult<Vec<QueuedJob>> {
        let mut inner = self.inner.lock().await;
        let mut touched = Vec::new();
        let mut exhausted = Vec::new();
        for job in inner.jobs.iter_mut() {
            let stalled = job.state == JobState::Active
                && job.claimed_at.map_or(true, |at| at <= claimed_before);
            if !stalled {
                continue;
            }
            job.claimed_at = None;
            job.last_error = Some(STALLED_JOB_ERROR.to_string());
            if job.attempts < max_attempts {
                job.state = JobState::Delayed;
                job.run_at = now;
            } else {
                job.state = JobState::Failed;
                exhausted.push(job.id.clone());
            }
            touched.push(job.clone());
        }
        for id in exhausted {
            if let Some(pos) = inner.position(&id) {
                let failed = inner.jobs.remove(pos);
                inner.jobs.push(failed);
            }
        }
        inner.trim_failed();
        Ok(touched)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<QueuedJob>> {
        let mut inner = self.inner.lock().await;
        let next = inner
            .jobs
            .iter_mut()
            .filter(|j| j.state.is_pending() && j.run_at <= now)
            .min_by_key(|j| j.run_at);
        Ok(next.map(|job| {
            job.state = JobState::Active;
            job.attempts += 1;
            job.claimed_at = Some(now);
            job.clone()
        }))
    }

    async fn complete(&self, job_id: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let pos = inner
            .position(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        inner.jobs.remove(pos);
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str, retry_at: Option<DateTime<Utc>>) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let pos = inner
            .position(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        let job = &mut inner.jobs[pos];
        job.last_error = Some(error.to_string());
        job.claimed_at = None;
        match retry_at {
            Some(at) => {
                job.state = JobState::Delayed;
                job.run_at = at;
            }
            None => {
                job.state = JobState::Failed;
                // newest failures sit at the back
                let failed = inner.jobs.remove(pos);
                inner.jobs.push(failed);
                inner.trim_failed();
            }
        }
        Ok(())
    }
}
