//! The composite job monitor: for
//! `Composite`/`CollectionScan` jobs, polls the metadata store directly
//! rather than trusting worker acknowledgements, so a crashed worker that
//! wrote a derivative but never published its progress message still gets
//! picked up.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::domain::{CollectionId, JobId};
use crate::store::ImageStore;

use super::JobManager;

const PAGE_SIZE: u32 = 200;

pub struct CompositeMonitor {
    jobs: Arc<JobManager>,
    images: Arc<dyn ImageStore>,
    config: CoreConfig,
}

impl CompositeMonitor {
    pub fn new(jobs: Arc<JobManager>, images: Arc<dyn ImageStore>, config: CoreConfig) -> Self {
        Self {
            jobs,
            images,
            config,
        }
    }

    /// Polls `job_id` until it reaches a terminal state or the stall limit:
    /// if no progress is observed for enough consecutive polls, monitoring
    /// for that job stops. Intended to be spawned per composite job via
    /// `tokio::spawn`.
    pub async fn watch(&self, job_id: JobId) {
        let interval = self.config.monitor_poll_interval();
        let mut stall_polls = 0u32;
        let mut last_progress = 0u64;

        loop {
            if self.jobs.is_cancelled(job_id) {
                return;
            }

            let Some(job) = self.jobs.get(job_id).await.ok().flatten() else {
                return;
            };
            if job.status.is_terminal() {
                return;
            }
            let Some(collection_id) = job.collection_id else {
                // Not a per-collection job; nothing for this monitor to reconcile.
                return;
            };

            let total = self.images.count_by_collection(collection_id).await.unwrap_or(0);
            let (thumb_done, cache_done) = self.reconcile_counts(collection_id, total).await;

            if job.stages.contains_key("thumbnail") {
                let _ = self
                    .jobs
                    .sync_stage_progress(job_id, "thumbnail", thumb_done, total)
                    .await;
            }
            if job.stages.contains_key("cache") {
                let _ = self
                    .jobs
                    .sync_stage_progress(job_id, "cache", cache_done, total)
                    .await;
            }

            let progress = thumb_done + cache_done;
            if progress > last_progress {
                stall_polls = 0;
            } else {
                stall_polls += 1;
            }
            last_progress = progress;

            if let Some(job) = self.jobs.get(job_id).await.ok().flatten() {
                if job.status.is_terminal() {
                    info!(%job_id, "composite monitor observed job completion");
                    return;
                }
            }

            if stall_polls >= self.config.monitor_stall_polls {
                warn!(%job_id, stall_polls, "composite monitor giving up after no progress");
                return;
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Counts images in `collection_id` with a thumbnail and a cache
    /// variant materialized, paging through `ImageStore::list_by_collection`
    /// since the port has no dedicated aggregate for this.
    async fn reconcile_counts(&self, collection_id: CollectionId, total: u64) -> (u64, u64) {
        let mut thumb_done = 0u64;
        let mut cache_done = 0u64;
        let mut page = 0u32;

        loop {
            let batch = match self
                .images
                .list_by_collection(collection_id, page, PAGE_SIZE, crate::store::ImageSort::CreatedAsc)
                .await
            {
                Ok(batch) => batch,
                Err(_) => break,
            };
            if batch.is_empty() {
                break;
            }
            for image in &batch {
                if image.thumbnail_path.is_some() {
                    thumb_done += 1;
                }
                if image.is_cached() {
                    cache_done += 1;
                }
            }
            if (batch.len() as u32) < PAGE_SIZE || (page as u64 + 1) * PAGE_SIZE as u64 >= total {
                break;
            }
            page += 1;
        }

        (thumb_done, cache_done)
    }
}
