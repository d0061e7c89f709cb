// src/queue/dispatcher.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::watch;

use super::JobQueue;

/// Periodically turn due recurring entries into pending jobs until
/// `shutdown` flips to true.
pub async fn run_dispatcher(queue: Arc<dyn JobQueue>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(tick_ms = tick.as_millis() as u64, "job dispatcher started");
    loop {
        match queue.promote_due_repeatables(Utc::now()).await {
            Ok(created) => {
                for job in &created {
                    counter!("ingest_jobs_scheduled_total").increment(1);
                    tracing::debug!(job_id = %job.id, connector = %job.data.connector_id, "materialized recurring job");
                }
            }
            Err(e) => tracing::warn!(error = ?e, "dispatcher: failed to promote recurring jobs"),
        }

        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("job dispatcher stopped");
}
