// src/queue/postgres.rs
//! Queue tables shared by every worker process; claims use
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never take the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::schedule::next_fire;
use super::{
    repeat_instance_id, repeatable_key, IngestJobData, JobQueue, JobState, QueueError, QueueResult,
    QueuedJob, RepeatableJob, FAILED_JOBS_RETAINED, STALLED_JOB_ERROR,
};

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    connector_id: String,
    state: String,
    attempts: i32,
    repeat_job_key: Option<String>,
    run_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl TryFrom<JobRow> for QueuedJob {
    type Error = QueueError;

    fn try_from(row: JobRow) -> QueueResult<Self> {
        let state = JobState::parse(&row.state)
            .ok_or_else(|| QueueError::Backend(format!("unknown job state {:?}", row.state)))?;
        Ok(QueuedJob {
            id: row.id,
            name: row.name,
            data: IngestJobData::new(row.connector_id),
            state,
            attempts: row.attempts.max(0) as u32,
            repeat_job_key: row.repeat_job_key,
            run_at: row.run_at,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
            last_error: row.last_error,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> QueueResult<Vec<QueuedJob>> {
    rows.into_iter().map(QueuedJob::try_from).collect()
}

pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn trim_failed(&self) -> QueueResult<()> {
        sqlx::query(
            r#"
            DELETE FROM ingest_jobs
            WHERE state = 'failed' AND id NOT IN (
                SELECT id FROM ingest_jobs WHERE state = 'failed'
                ORDER BY finished_at DESC
                LIMIT $1
            )
            "#,
        )
        .bind(FAILED_JOBS_RETAINED as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn add(&self, name: &str, data: IngestJobData, job_id: &str, run_at: DateTime<Utc>) -> QueueResult<QueuedJob> {
        let state = JobState::pending_for(run_at, Utc::now());
        sqlx::query(
            r#"
            INSERT INTO ingest_jobs (id, name, connector_id, state, run_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(name)
        .bind(&data.connector_id)
        .bind(state.as_str())
        .bind(run_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM ingest_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn add_repeatable(&self, name: &str, job_id: &str, pattern: &str) -> QueueResult<RepeatableJob> {
        let next_run_at = next_fire(pattern, Utc::now())?;
        let key = repeatable_key(name, job_id, pattern);
        sqlx::query(
            r#"
            INSERT INTO ingest_repeatables (key, name, job_id, pattern, next_run_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(name)
        .bind(job_id)
        .bind(pattern)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;

        let rep = sqlx::query_as::<_, RepeatableJob>("SELECT * FROM ingest_repeatables WHERE key = $1")
            .bind(&key)
            .fetch_one(&self.pool)
            .await?;
        Ok(rep)
    }

    async fn repeatable_jobs(&self) -> QueueResult<Vec<RepeatableJob>> {
        let rows = sqlx::query_as::<_, RepeatableJob>("SELECT * FROM ingest_repeatables ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn remove_repeatable_by_key(&self, key: &str) -> QueueResult<bool> {
        let done = sqlx::query("DELETE FROM ingest_repeatables WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn jobs(&self, states: &[JobState]) -> QueueResult<Vec<QueuedJob>> {
        let states: Vec<&str> = states.iter().map(JobState::as_str).collect();
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM ingest_jobs WHERE state = ANY($1) ORDER BY run_at, created_at",
        )
        .bind(&states)
        .fetch_all(&self.pool)
        .await?;
        into_jobs(rows)
    }

    async fn remove_job(&self, job_id: &str) -> QueueResult<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM ingest_jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        let job = QueuedJob::try_from(row)?;

        if let Some(key) = job.repeat_job_key.as_deref() {
            let owned: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM ingest_repeatables WHERE key = $1)")
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;
            if owned && job.state.is_pending() {
                return Err(QueueError::OwnedByScheduler {
                    job_id: job_id.to_string(),
                    repeat_job_key: key.to_string(),
                });
            }
        }

        sqlx::query("DELETE FROM ingest_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn promote_due_repeatables(&self, now: DateTime<Utc>) -> QueueResult<Vec<QueuedJob>> {
        let mut tx = self.pool.begin().await?;
        let due = sqlx::query_as::<_, RepeatableJob>(
            "SELECT * FROM ingest_repeatables WHERE next_run_at <= $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut created = Vec::new();
        for rep in due {
            let id = repeat_instance_id(&rep.job_id, rep.next_run_at);
            let row = sqlx::query_as::<_, JobRow>(
                r#"
                INSERT INTO ingest_jobs (id, name, connector_id, state, repeat_job_key, run_at)
                VALUES ($1, $2, $3, 'waiting', $4, $5)
                ON CONFLICT (id) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(&id)
            .bind(&rep.name)
            .bind(&rep.job_id)
            .bind(&rep.key)
            .bind(rep.next_run_at)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = row {
                created.push(QueuedJob::try_from(row)?);
            }

            sqlx::query("UPDATE ingest_repeatables SET next_run_at = $2 WHERE key = $1")
                .bind(&rep.key)
                .bind(next_fire(&rep.pattern, now)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn recover_stalled(
        &self,
        now: DateTime<Utc>,
        claimed_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> QueueResult<Vec<QueuedJob>> {
        // rows claimed before the column existed have no claimed_at
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE ingest_jobs SET
                state = CASE WHEN attempts < $3 THEN 'delayed' ELSE 'failed' END,
                run_at = CASE WHEN attempts < $3 THEN $1 ELSE run_at END,
                finished_at = CASE WHEN attempts < $3 THEN finished_at ELSE $1 END,
                last_error = $4,
                claimed_at = NULL
            WHERE state = 'active' AND COALESCE(claimed_at, run_at) <= $2
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(claimed_before)
        .bind(max_attempts.min(i32::MAX as u32) as i32)
        .bind(STALLED_JOB_ERROR)
        .fetch_all(&self.pool)
        .await?;
        let jobs = into_jobs(rows)?;
        if jobs.iter().any(|j| j.state == JobState::Failed) {
            self.trim_failed().await?;
        }
        Ok(jobs)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<QueuedJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE ingest_jobs SET state = 'active', attempts = attempts + 1, claimed_at = $1
            WHERE id = (
                SELECT id FROM ingest_jobs
                WHERE state IN ('waiting', 'delayed') AND run_at <= $1
                ORDER BY run_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueuedJob::try_from).transpose()
    }

    async fn complete(&self, job_id: &str) -> QueueResult<()> {
        let done = sqlx::query("DELETE FROM ingest_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(QueueError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str, retry_at: Option<DateTime<Utc>>) -> QueueResult<()> {
        let done = match retry_at {
            Some(at) => {
                sqlx::query(
                    "UPDATE ingest_jobs SET state = 'delayed', run_at = $2, last_error = $3, claimed_at = NULL WHERE id = $1",
                )
                .bind(job_id)
                .bind(at)
                .bind(error)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE ingest_jobs SET state = 'failed', last_error = $2, finished_at = now(), claimed_at = NULL WHERE id = $1",
                )
                .bind(job_id)
                .bind(error)
                .execute(&self.pool)
                .await?
            }
        };
        if done.rows_affected() == 0 {
            return Err(QueueError::NotFound(job_id.to_string()));
        }

        if retry_at.is_none() {
            self.trim_failed().await?;
        }
        Ok(())
    }
}
