// tests/scheduler_reconcile.rs
//
// Producer/orchestrator against the in-memory queue, wrapped to record
// every mutating call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use surveillance_ingest::connectors::{
    Connector, ConnectorKind, ConnectorMetadata, ConnectorRegistry, ConnectorResult, RunContext,
};
use surveillance_ingest::ingest::{IngestOrchestrator, IngestProducer};
use surveillance_ingest::queue::{
    IngestJobData, JobQueue, JobState, MemoryQueue, QueueError, QueueResult, QueuedJob, RepeatableJob, INGEST_JOB,
};

#[derive(Default)]
struct RecordingQueue {
    inner: MemoryQueue,
    mutations: AtomicUsize,
    fail_next_repeatable_removal: AtomicBool,
}

impl RecordingQueue {
    fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn add(&self, name: &str, data: IngestJobData, job_id: &str, run_at: DateTime<Utc>) -> QueueResult<QueuedJob> {
        self.touch();
        self.inner.add(name, data, job_id, run_at).await
    }

    async fn add_repeatable(&self, name: &str, job_id: &str, pattern: &str) -> QueueResult<RepeatableJob> {
        self.touch();
        self.inner.add_repeatable(name, job_id, pattern).await
    }

    async fn repeatable_jobs(&self) -> QueueResult<Vec<RepeatableJob>> {
        self.inner.repeatable_jobs().await
    }

    async fn remove_repeatable_by_key(&self, key: &str) -> QueueResult<bool> {
        self.touch();
        if self.fail_next_repeatable_removal.swap(false, Ordering::SeqCst) {
            return Err(QueueError::Backend("simulated outage".into()));
        }
        self.inner.remove_repeatable_by_key(key).await
    }

    async fn jobs(&self, states: &[JobState]) -> QueueResult<Vec<QueuedJob>> {
        self.inner.jobs(states).await
    }

    async fn remove_job(&self, job_id: &str) -> QueueResult<()> {
        self.touch();
        self.inner.remove_job(job_id).await
    }

    async fn promote_due_repeatables(&self, now: DateTime<Utc>) -> QueueResult<Vec<QueuedJob>> {
        self.inner.promote_due_repeatables(now).await
    }

    async fn recover_stalled(
        &self,
        now: DateTime<Utc>,
        claimed_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> QueueResult<Vec<QueuedJob>> {
        self.inner.recover_stalled(now, claimed_before, max_attempts).await
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<QueuedJob>> {
        self.inner.claim_next(now).await
    }

    async fn complete(&self, job_id: &str) -> QueueResult<()> {
        self.inner.complete(job_id).await
    }

    async fn fail(&self, job_id: &str, error: &str, retry_at: Option<DateTime<Utc>>) -> QueueResult<()> {
        self.inner.fail(job_id, error, retry_at).await
    }
}

struct Idle(ConnectorMetadata);

#[async_trait]
impl Connector for Idle {
    fn metadata(&self) -> &ConnectorMetadata {
        &self.0
    }

    async fn collect(&self, _ctx: &RunContext) -> ConnectorResult {
        ConnectorResult::live(Vec::new(), None)
    }
}

fn meta(id: &str, schedule: &str) -> ConnectorMetadata {
    ConnectorMetadata {
        id: id.into(),
        title: id.to_uppercase(),
        kind: ConnectorKind::Api,
        schedule: schedule.into(),
        homepage: None,
        description: None,
    }
}

fn registry(metas: &[ConnectorMetadata]) -> Arc<ConnectorRegistry> {
    let mut r = ConnectorRegistry::new();
    for m in metas {
        r.register(Arc::new(Idle(m.clone()))).unwrap();
    }
    Arc::new(r)
}

fn orchestrator(queue: &Arc<RecordingQueue>, metas: &[ConnectorMetadata]) -> IngestOrchestrator {
    IngestOrchestrator::new(registry(metas), IngestProducer::new(queue.clone() as Arc<dyn JobQueue>))
}

async fn patterns(queue: &RecordingQueue) -> Vec<(String, String)> {
    let mut v: Vec<_> = queue
        .repeatable_jobs()
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.job_id, r.pattern))
        .collect();
    v.sort();
    v
}

#[tokio::test]
async fn stale_recurring_job_is_removed_and_rerun_is_noop() {
    let queue = Arc::new(RecordingQueue::default());
    queue.add_repeatable(INGEST_JOB, "c", "0 0 * * *").await.unwrap();
    queue.add_repeatable(INGEST_JOB, "a", "0 0 * * *").await.unwrap();

    let metas = [meta("a", "0 0 * * *"), meta("b", "30 6 * * *")];
    let orch = orchestrator(&queue, &metas);

    let report = orch.ensure_schedules().await.unwrap();
    assert_eq!(report.pruned.recurring_removed, vec!["c"]);
    assert_eq!(report.created, vec!["b"]);
    assert_eq!(report.unchanged, vec!["a"]);
    assert_eq!(
        patterns(&queue).await,
        vec![("a".into(), "0 0 * * *".into()), ("b".into(), "30 6 * * *".into())]
    );

    let before = queue.mutations();
    let again = orch.ensure_schedules().await.unwrap();
    assert!(again.is_noop());
    assert_eq!(queue.mutations(), before, "second pass must not touch the queue");
}

#[tokio::test]
async fn changed_schedule_replaces_the_entry() {
    let queue = Arc::new(RecordingQueue::default());
    orchestrator(&queue, &[meta("a", "0 0 * * *")]).ensure_schedules().await.unwrap();

    let report = orchestrator(&queue, &[meta("a", "15 3 * * *")]).ensure_schedules().await.unwrap();
    assert_eq!(report.replaced, vec!["a"]);
    assert_eq!(patterns(&queue).await, vec![("a".into(), "15 3 * * *".into())]);
}

#[tokio::test]
async fn pending_jobs_for_inactive_connectors_are_swept() {
    let queue = Arc::new(RecordingQueue::default());
    let producer = IngestProducer::new(queue.clone() as Arc<dyn JobQueue>);
    producer.enqueue(IngestJobData::new("gone"), None).await.unwrap();
    producer
        .enqueue(IngestJobData::new("a"), Some(StdDuration::from_secs(3600)))
        .await
        .unwrap();

    let valid: HashSet<String> = HashSet::from(["a".to_string()]);
    let report = producer.prune_stale_recurring(&valid).await.unwrap();
    assert_eq!(report.pending_removed.len(), 1);
    assert!(report.pending_removed[0].starts_with("gone:"));

    let left = queue.jobs(&JobState::PENDING).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].data.connector_id, "a");
    assert_eq!(left[0].state, JobState::Delayed);
}

#[tokio::test]
async fn instance_owned_by_surviving_schedule_is_cleaned_up() {
    let queue = Arc::new(RecordingQueue::default());
    queue.add_repeatable(INGEST_JOB, "gone", "0 0 * * *").await.unwrap();
    let created = queue
        .promote_due_repeatables(Utc::now() + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert!(created[0].repeat_job_key.is_some());

    // first removal attempt fails, so the sweep meets a scheduler-owned instance
    queue.fail_next_repeatable_removal.store(true, Ordering::SeqCst);
    let producer = IngestProducer::new(queue.clone() as Arc<dyn JobQueue>);
    let report = producer.prune_stale_recurring(&HashSet::new()).await.unwrap();

    assert!(report.recurring_removed.is_empty());
    assert_eq!(report.pending_removed, vec![created[0].id.clone()]);
    assert!(queue.repeatable_jobs().await.unwrap().is_empty());
    assert!(queue.jobs(&JobState::PENDING).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_registry_schedules_nothing() {
    let queue = Arc::new(RecordingQueue::default());
    queue.add_repeatable(INGEST_JOB, "c", "0 0 * * *").await.unwrap();
    let before = queue.mutations();
    let report = orchestrator(&queue, &[]).ensure_schedules().await.unwrap();
    assert!(report.is_noop());
    assert_eq!(queue.mutations(), before);
}

#[tokio::test]
async fn enqueue_ids_are_connector_scoped() {
    let queue = Arc::new(RecordingQueue::default());
    let orch = orchestrator(&queue, &[meta("a", "0 0 * * *"), meta("b", "0 0 * * *")]);
    assert_eq!(orch.enqueue_all().await.unwrap(), 2);
    let jobs = queue.jobs(&[JobState::Waiting]).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().any(|j| j.id.starts_with("a:") && j.name == INGEST_JOB));
    assert!(jobs.iter().any(|j| j.id.starts_with("b:")));
}
