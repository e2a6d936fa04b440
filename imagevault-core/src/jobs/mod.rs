//! Job Manager (C7): state machine, staged progress, cancellation,
//! retention, monitor loop, and DLQ recovery.
//!
//! `JobManager` is a plain struct built from `Arc<dyn JobStore>` +
//! `Arc<dyn WorkQueue>` + `CoreConfig` — no module-level singleton. The
//! caller (`imagevault-server`'s `CoreServices`) owns the `Arc` and clones
//! it into the HTTP handlers, the retention sweeper, and the monitor loop.

pub mod dlq;
pub mod monitor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::config::CoreConfig;
use crate::domain::{CollectionId, Job, JobId, JobKind, JobStatus};
use crate::error::{CoreError, ItemError, Result};
use crate::queue::{WorkMessage, WorkQueue};
use crate::store::{JobListFilter, JobStore};

/// Maps a `JobKind` to the routing key (queue name) of its first stage.
/// Stage names for every `JobKind` are already the queue names used
/// throughout (`"discover"`, `"scan"`, `"thumbnail"`, `"cache"`); this is
/// just the kind-level lookup used when a job is first submitted.
pub fn entry_routing_key(kind: JobKind) -> &'static str {
    kind.stage_names()
        .first()
        .copied()
        .unwrap_or("discover")
}

/// The `message_kind` header stamped onto a kind's entry-stage message,
/// used by dead-letter recovery to resolve a routing key without needing
/// to know what stage a redelivered message was on.
fn message_kind_name(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Discovery => "Discovery",
        JobKind::CollectionScan => "CollectionScan",
        JobKind::ThumbnailGeneration => "ThumbnailGeneration",
        JobKind::CacheGeneration => "CacheGeneration",
        JobKind::Composite => "Composite",
        JobKind::BulkAdd => "BulkAdd",
    }
}

pub struct JobManager {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    config: CoreConfig,
    cancellations: DashMap<JobId, Arc<AtomicBool>>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn WorkQueue>, config: CoreConfig) -> Self {
        Self {
            store,
            queue,
            config,
            cancellations: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The cancellation flag long-running stage loops observe at each
    /// bounded unit of work. Lazily created so a caller can
    /// fetch it for a job before or after submission.
    pub fn cancellation_flag(&self, job_id: JobId) -> Arc<AtomicBool> {
        self.cancellations
            .entry(job_id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Creates the job, persists it, and publishes the entry-stage message.
    /// Discovery/BulkAdd start at `discover`, the others start at their
    /// single stage.
    pub async fn submit(
        &self,
        kind: JobKind,
        collection_id: Option<CollectionId>,
        parameters: serde_json::Value,
    ) -> Result<Job> {
        let job = Job::new(kind, collection_id);
        let job = self.store.create(job).await?;
        self.cancellation_flag(job.id);

        let stage = entry_routing_key(kind);
        let message = WorkMessage {
            job_id: job.id,
            stage: stage.to_string(),
            collection_id,
            image_ref: None,
            parameters,
            attempt: 0,
            message_kind: message_kind_name(kind).to_string(),
        };
        self.queue.publish(stage, message).await?;
        info!(job_id = %job.id, ?kind, "submitted job");
        Ok(job)
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.store.get(id).await
    }

    pub async fn list(&self, filter: JobListFilter) -> Result<Vec<Job>> {
        self.store.list(filter).await
    }

    /// Best-effort cancellation: flips the in-process flag observed by
    /// worker loops and marks the job `Cancelled` if it is not already in
    /// a terminal state. Already-committed writes remain.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        let Some(job) = self.store.get(id).await? else {
            return Err(CoreError::NotFound(id.to_string()));
        };
        if job.status.is_terminal() {
            return Ok(());
        }
        self.cancellation_flag(id).store(true, Ordering::SeqCst);
        self.store.update_status(id, JobStatus::Cancelled).await?;
        Ok(())
    }

    pub fn is_cancelled(&self, id: JobId) -> bool {
        self.cancellations
            .get(&id)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Advances one stage's progress and rolls the job's top-level status
    /// forward, mirroring `Job::maybe_complete`/`StageState::maybe_complete`
    /// so the manager's view of the state machine matches the domain type's
    /// own invariant.
    pub async fn record_progress(
        &self,
        id: JobId,
        stage: &str,
        completed_delta: u64,
        total: Option<u64>,
        message: Option<String>,
    ) -> Result<()> {
        let Some(mut job) = self.store.get(id).await? else {
            return Err(CoreError::NotFound(id.to_string()));
        };
        if job.status.is_terminal() {
            return Ok(());
        }

        job.mark_started();
        if matches!(job.status, JobStatus::InProgress) {
            self.store.update_status(id, JobStatus::InProgress).await?;
        }

        let error_count = job
            .error_log
            .iter()
            .filter(|e| e.item.starts_with(stage))
            .count() as u64;

        if let Some(state) = job.stage_mut(stage) {
            if let Some(total) = total {
                state.set_total(total);
            }
            state.start();
            state.bump(completed_delta);
            state.maybe_complete(error_count);

            self.store
                .update_stage(
                    id,
                    stage,
                    state.status,
                    state.completed_items,
                    state.total_items,
                    message,
                )
                .await?;
        }

        job.maybe_complete();
        if matches!(job.status, JobStatus::Completed) {
            self.store.update_status(id, JobStatus::Completed).await?;
        }
        Ok(())
    }

    /// Sets one stage's progress to an absolute `(completed, total)` pair
    /// rather than bumping by a delta, used by the monitor loop to
    /// reconcile stage state against materialized records instead of
    /// trusting worker acknowledgements alone.
    pub async fn sync_stage_progress(&self, id: JobId, stage: &str, completed: u64, total: u64) -> Result<()> {
        let Some(mut job) = self.store.get(id).await? else {
            return Err(CoreError::NotFound(id.to_string()));
        };
        if job.status.is_terminal() {
            return Ok(());
        }

        job.mark_started();
        if matches!(job.status, JobStatus::InProgress) {
            self.store.update_status(id, JobStatus::InProgress).await?;
        }

        let error_count = job
            .error_log
            .iter()
            .filter(|e| e.item.starts_with(stage))
            .count() as u64;

        if let Some(state) = job.stage_mut(stage) {
            state.set_total(total);
            state.start();
            state.completed_items = completed;
            state.maybe_complete(error_count);
            self.store
                .update_stage(id, stage, state.status, state.completed_items, state.total_items, None)
                .await?;
        }

        job.maybe_complete();
        if matches!(job.status, JobStatus::Completed) {
            self.store.update_status(id, JobStatus::Completed).await?;
        }
        Ok(())
    }

    /// Records a per-item fault in the job's `error_log` without failing
    /// the job.
    pub async fn record_item_error(&self, id: JobId, item: impl Into<String>, err: &CoreError) -> Result<()> {
        self.store
            .append_error(id, ItemError {
                item: item.into(),
                message: err.to_string(),
            })
            .await
    }

    /// Reserved for unrecoverable setup failures, not per-item faults.
    pub async fn fail(&self, id: JobId, reason: impl Into<String>) -> Result<()> {
        self.store
            .append_error(id, ItemError {
                item: "job".to_string(),
                message: reason.into(),
            })
            .await?;
        self.store.update_status(id, JobStatus::Failed).await
    }

    /// Runs forever, deleting terminal jobs past the retention window every
    /// `retention_sweep_interval`.
    /// Intended to be spawned once at server startup via `tokio::spawn`.
    pub async fn run_retention_sweeper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.retention_sweep_interval());
        loop {
            ticker.tick().await;
            match self.store.delete_older_than(self.config.job_retention()).await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "retention sweep removed terminal jobs");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "retention sweep failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::store::InMemoryStore;

    fn manager() -> JobManager {
        JobManager::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryQueue::new()),
            CoreConfig::default(),
        )
    }

    #[tokio::test]
    async fn submit_persists_job_and_publishes_entry_stage() {
        let mgr = manager();
        let job = mgr
            .submit(JobKind::CollectionScan, None, serde_json::Value::Null)
            .await
            .unwrap();
        assert!(matches!(job.status, JobStatus::Pending));

        let fetched = mgr.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
    }

    #[tokio::test]
    async fn record_progress_completes_job_once_every_stage_finishes() {
        let mgr = manager();
        let job = mgr
            .submit(JobKind::ThumbnailGeneration, None, serde_json::Value::Null)
            .await
            .unwrap();

        mgr.record_progress(job.id, "thumbnail", 3, Some(3), None)
            .await
            .unwrap();

        let updated = mgr.get(job.id).await.unwrap().unwrap();
        assert!(matches!(updated.status, JobStatus::Completed));
    }

    #[tokio::test]
    async fn cancel_is_a_noop_on_terminal_jobs() {
        let mgr = manager();
        let job = mgr
            .submit(JobKind::ThumbnailGeneration, None, serde_json::Value::Null)
            .await
            .unwrap();
        mgr.record_progress(job.id, "thumbnail", 1, Some(1), None)
            .await
            .unwrap();

        mgr.cancel(job.id).await.unwrap();
        let still_completed = mgr.get(job.id).await.unwrap().unwrap();
        assert!(matches!(still_completed.status, JobStatus::Completed));
    }

    #[tokio::test]
    async fn cancel_flips_flag_and_marks_job_cancelled() {
        let mgr = manager();
        let job = mgr
            .submit(JobKind::CollectionScan, None, serde_json::Value::Null)
            .await
            .unwrap();

        mgr.cancel(job.id).await.unwrap();
        assert!(mgr.is_cancelled(job.id));
        let fetched = mgr.get(job.id).await.unwrap().unwrap();
        assert!(matches!(fetched.status, JobStatus::Cancelled));
    }
}
