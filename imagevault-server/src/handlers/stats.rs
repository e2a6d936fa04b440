//! Cache-distribution statistics.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use imagevault_core::domain::CacheFolderId;
use imagevault_core::store::CacheFolderUsage;

use crate::errors::{ApiError, ApiResult};
use crate::state::CoreServices;

pub async fn cache_distribution(
    State(services): State<Arc<CoreServices>>,
) -> ApiResult<Json<Vec<CacheFolderUsage>>> {
    let usage = services.stats.cache_distribution().await?;
    Ok(Json(usage))
}

pub async fn cache_distribution_for_folder(
    State(services): State<Arc<CoreServices>>,
    Path(folder_id): Path<CacheFolderId>,
) -> ApiResult<Json<CacheFolderUsage>> {
    let usage = services
        .stats
        .cache_distribution()
        .await?
        .into_iter()
        .find(|u| u.folder_id == folder_id)
        .ok_or_else(|| ApiError::not_found(format!("cache folder {folder_id} not found")))?;
    Ok(Json(usage))
}
