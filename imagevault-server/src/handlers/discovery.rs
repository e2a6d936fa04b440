//! `POST /discovery`: kicks off collection discovery under a parent root,
//! optionally chaining straight through scan/thumbnail/cache for every
//! newly ingested collection.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use imagevault_core::domain::{Job, JobKind};

use crate::errors::ApiResult;
use crate::state::CoreServices;
use crate::workers::messages::DiscoverParams;

#[derive(Debug, Deserialize)]
pub struct DiscoveryRequest {
    pub parent_root: String,
    #[serde(default)]
    pub include_subfolders: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub library_id: Option<String>,
    /// When `true`, newly discovered collections chain into
    /// scan→thumbnail→cache (`JobKind::BulkAdd`); otherwise discovery stops
    /// at ingestion (`JobKind::Discovery`).
    #[serde(default)]
    pub bulk_add: bool,
}

pub async fn submit_discovery(
    State(services): State<Arc<CoreServices>>,
    Json(request): Json<DiscoveryRequest>,
) -> ApiResult<Json<Job>> {
    let kind = if request.bulk_add {
        JobKind::BulkAdd
    } else {
        JobKind::Discovery
    };

    let params = DiscoverParams {
        parent_root: request.parent_root,
        include_subfolders: request.include_subfolders,
        prefix: request.prefix,
        library_id: request.library_id,
        chain: request.bulk_add,
    };

    let job = services
        .jobs
        .submit(kind, None, serde_json::to_value(params).map_err(imagevault_core::CoreError::Serialization)?)
        .await?;
    Ok(Json(job))
}
