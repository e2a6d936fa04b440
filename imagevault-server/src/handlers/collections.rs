//! Collection listing, soft-deletion, and the two "do it again" actions
//! (rescan, thumbnail regeneration) that resubmit jobs against an existing
//! collection.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use imagevault_core::domain::{Collection, CollectionId, JobKind};

use crate::errors::ApiResult;
use crate::state::CoreServices;
use crate::workers::messages::{ScanParams, ThumbnailParams};

#[derive(Debug, Deserialize)]
pub struct ListCollectionsQuery {
    #[serde(default)]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page_size() -> u32 {
    50
}

pub async fn list_collections(
    State(services): State<Arc<CoreServices>>,
    Query(query): Query<ListCollectionsQuery>,
) -> ApiResult<Json<Vec<Collection>>> {
    let collections = services.collections.list(query.page, query.page_size).await?;
    Ok(Json(collections))
}

pub async fn get_collection(
    State(services): State<Arc<CoreServices>>,
    Path(collection_id): Path<CollectionId>,
) -> ApiResult<Json<Collection>> {
    let collection = services
        .collections
        .get_by_id(collection_id)
        .await?
        .ok_or_else(|| crate::errors::ApiError::not_found(format!("collection {collection_id} not found")))?;
    Ok(Json(collection))
}

pub async fn delete_collection(
    State(services): State<Arc<CoreServices>>,
    Path(collection_id): Path<CollectionId>,
) -> ApiResult<()> {
    let mut collection = services
        .collections
        .get_by_id(collection_id)
        .await?
        .ok_or_else(|| crate::errors::ApiError::not_found(format!("collection {collection_id} not found")))?;
    collection.soft_delete();
    services.collections.update(collection).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct RescanRequest {
    #[serde(default)]
    pub force_rescan: bool,
}

pub async fn rescan_collection(
    State(services): State<Arc<CoreServices>>,
    Path(collection_id): Path<CollectionId>,
    Json(request): Json<RescanRequest>,
) -> ApiResult<Json<imagevault_core::domain::Job>> {
    let params = ScanParams {
        force_rescan: request.force_rescan,
        chain: true,
    };
    let job = services
        .jobs
        .submit(
            JobKind::CollectionScan,
            Some(collection_id),
            serde_json::to_value(params).map_err(imagevault_core::CoreError::Serialization)?,
        )
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct RegenerateThumbnailsRequest {
    #[serde(default)]
    pub w: Option<u32>,
    #[serde(default)]
    pub h: Option<u32>,
}

pub async fn regenerate_thumbnails(
    State(services): State<Arc<CoreServices>>,
    Path(collection_id): Path<CollectionId>,
    Json(request): Json<RegenerateThumbnailsRequest>,
) -> ApiResult<Json<imagevault_core::domain::Job>> {
    let params = ThumbnailParams {
        w: request.w.unwrap_or(services.config.thumbnail_w),
        h: request.h.unwrap_or(services.config.thumbnail_h),
        force_regen: true,
        chain: false,
    };
    let job = services
        .jobs
        .submit(
            JobKind::ThumbnailGeneration,
            Some(collection_id),
            serde_json::to_value(params).map_err(imagevault_core::CoreError::Serialization)?,
        )
        .await?;
    Ok(Json(job))
}
