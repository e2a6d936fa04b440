use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{CollectionId, JobId};
use crate::error::ItemError;

/// The kinds of work a job can represent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Discovery,
    CollectionScan,
    ThumbnailGeneration,
    CacheGeneration,
    Composite,
    BulkAdd,
}

impl JobKind {
    /// Linear stage names for this job kind, in order. `Composite`/`BulkAdd`
    /// fan out per-collection for the starred stages;
    /// the manager expands those into per-collection stage instances.
    pub fn stage_names(&self) -> &'static [&'static str] {
        match self {
            JobKind::Discovery => &["discover"],
            JobKind::BulkAdd => &["discover", "scan", "thumbnail", "cache"],
            JobKind::CollectionScan => &["scan", "thumbnail", "cache"],
            JobKind::ThumbnailGeneration => &["thumbnail"],
            JobKind::CacheGeneration => &["cache"],
            JobKind::Composite => &["scan", "thumbnail", "cache"],
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageState {
    pub name: String,
    pub status: StageStatus,
    pub completed_items: u64,
    pub total_items: u64,
    pub message: Option<String>,
}

impl StageState {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Pending,
            completed_items: 0,
            total_items: 0,
            message: None,
        }
    }

    pub fn start(&mut self) {
        if matches!(self.status, StageStatus::Pending) {
            self.status = StageStatus::InProgress;
        }
    }

    /// Set the known total for this stage; a stage with total `0` completes
    /// immediately.
    pub fn set_total(&mut self, total: u64) {
        self.total_items = total;
        if total == 0 {
            self.status = StageStatus::Completed;
        }
    }

    /// `completed_items` is monotone non-decreasing.
    pub fn bump(&mut self, by: u64) {
        self.completed_items += by;
    }

    /// A stage is complete once acknowledgements plus per-item errors cover
    /// the known total.
    pub fn maybe_complete(&mut self, error_count: u64) {
        if self.completed_items + error_count >= self.total_items {
            self.status = StageStatus::Completed;
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub completed: u64,
    pub total: u64,
    /// Weighted sum across stages with equal weights by default, not a
    /// flat `completed / total`; see `Job::progress`.
    pub percent: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub stages: BTreeMap<String, StageState>,
    pub collection_id: Option<CollectionId>,
    pub error_log: Vec<ItemError>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, collection_id: Option<CollectionId>) -> Self {
        let now = Utc::now();
        let stages = kind
            .stage_names()
            .iter()
            .map(|name| (name.to_string(), StageState::pending(*name)))
            .collect();
        Self {
            id: JobId::new(),
            kind,
            status: JobStatus::Pending,
            stages,
            collection_id,
            error_log: Vec::new(),
            cancelled: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// A job enters `InProgress` on its first stage start.
    pub fn mark_started(&mut self) {
        if matches!(self.status, JobStatus::Pending) {
            self.status = JobStatus::InProgress;
            self.updated_at = Utc::now();
        }
    }

    /// `status = Completed` iff every stage is `Completed` and
    /// `completed_items >= total_items` for each.
    pub fn all_stages_complete(&self) -> bool {
        self.stages.values().all(|s| {
            matches!(s.status, StageStatus::Completed) && s.completed_items >= s.total_items
        })
    }

    pub fn maybe_complete(&mut self) {
        if !self.status.is_terminal() && self.all_stages_complete() {
            self.status = JobStatus::Completed;
            self.completed_at = Some(Utc::now());
            self.updated_at = Utc::now();
        }
    }

    /// Top-level `Failed` status is reserved for unrecoverable setup
    /// failures, not per-image errors.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_log.push(ItemError {
            item: "job".to_string(),
            message: reason.into(),
        });
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Cancellation is best-effort: already-committed writes remain.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.cancelled = true;
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    pub fn progress(&self) -> JobProgress {
        // Weighted sum across stages with equal weights by default.
        if self.stages.is_empty() {
            return JobProgress::default();
        }
        let n = self.stages.len() as f64;
        let percent: f64 = self
            .stages
            .values()
            .map(|s| {
                if s.total_items == 0 {
                    100.0
                } else {
                    (s.completed_items as f64 / s.total_items as f64 * 100.0).min(100.0)
                }
            })
            .sum::<f64>()
            / n;
        let total: u64 = self.stages.values().map(|s| s.total_items).sum();
        let completed: u64 = self.stages.values().map(|s| s.completed_items).sum();
        JobProgress {
            completed,
            total,
            percent,
        }
    }

    pub fn stage_mut(&mut self, name: &str) -> Option<&mut StageState> {
        self.stages.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_total_stage_completes_immediately() {
        let mut stage = StageState::pending("scan");
        stage.set_total(0);
        assert!(matches!(stage.status, StageStatus::Completed));
    }

    #[test]
    fn job_completes_only_when_every_stage_completes() {
        let mut job = Job::new(JobKind::CollectionScan, None);
        for name in ["scan", "thumbnail", "cache"] {
            let stage = job.stage_mut(name).unwrap();
            stage.set_total(2);
            stage.bump(2);
            stage.maybe_complete(0);
        }
        job.maybe_complete();
        assert!(matches!(job.status, JobStatus::Completed));
    }

    #[test]
    fn job_stays_open_while_a_stage_is_incomplete() {
        let mut job = Job::new(JobKind::CollectionScan, None);
        job.stage_mut("scan").unwrap().set_total(2);
        job.stage_mut("scan").unwrap().bump(1);
        job.maybe_complete();
        assert!(!matches!(job.status, JobStatus::Completed));
    }

    #[test]
    fn cancel_is_terminal_and_idempotent() {
        let mut job = Job::new(JobKind::CollectionScan, None);
        job.cancel();
        assert!(matches!(job.status, JobStatus::Cancelled));
        let first_completed_at = job.completed_at;
        job.cancel();
        assert_eq!(job.completed_at, first_completed_at);
    }
}
