//! Job inspection and cancellation routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use imagevault_core::domain::{Job, JobId, JobProgress, JobStatus};
use imagevault_core::store::JobListFilter;

use crate::errors::ApiResult;
use crate::state::CoreServices;

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    status: Option<JobStatus>,
    since: Option<DateTime<Utc>>,
}

/// `{job_id, status, progress, errors[]}` per spec.md §7's user-visible
/// failure/status shape — `Job::progress()` is computed fresh on each
/// response rather than trusted from a stored field.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    job: Job,
    progress: JobProgress,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let progress = job.progress();
        Self { job, progress }
    }
}

pub async fn list_jobs(
    State(services): State<Arc<CoreServices>>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<JobResponse>>> {
    let filter = JobListFilter {
        status: query.status,
        since: query.since,
    };
    let jobs = services.jobs.list(filter).await?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

pub async fn get_job(
    State(services): State<Arc<CoreServices>>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Json<JobResponse>> {
    let job = services
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| crate::errors::ApiError::not_found(format!("job {job_id} not found")))?;
    Ok(Json(job.into()))
}

pub async fn cancel_job(
    State(services): State<Arc<CoreServices>>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Json<JobResponse>> {
    services.jobs.cancel(job_id).await?;
    let job = services
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| crate::errors::ApiError::not_found(format!("job {job_id} not found")))?;
    Ok(Json(job.into()))
}
