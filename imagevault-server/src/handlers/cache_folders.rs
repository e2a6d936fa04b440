//! Cache-folder CRUD and the standalone path-validation check backing the
//! "add a cache folder" UI flow.

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use imagevault_core::cache_placement::CachePlacementEngine;
use imagevault_core::domain::{CacheFolder, CacheFolderId};

use crate::errors::{ApiError, ApiResult};
use crate::state::CoreServices;

#[derive(Debug, Deserialize)]
pub struct CreateCacheFolderRequest {
    pub name: String,
    pub root_path: String,
    pub priority: i32,
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCacheFolderRequest {
    pub name: Option<String>,
    pub priority: Option<i32>,
    pub max_size_bytes: Option<Option<u64>>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ValidatePathRequest {
    pub root_path: String,
}

#[derive(Debug, Serialize)]
pub struct ValidatePathResponse {
    pub writable: bool,
    pub message: Option<String>,
}

pub async fn create_cache_folder(
    State(services): State<Arc<CoreServices>>,
    Json(request): Json<CreateCacheFolderRequest>,
) -> ApiResult<Json<CacheFolder>> {
    CachePlacementEngine::write_probe(Path::new(&request.root_path)).await?;

    let mut folder = CacheFolder::new(request.name, request.root_path, request.priority);
    folder.max_size_bytes = request.max_size_bytes;

    let folder = services.cache_folders.create(folder).await?;
    Ok(Json(folder))
}

pub async fn list_cache_folders(
    State(services): State<Arc<CoreServices>>,
) -> ApiResult<Json<Vec<CacheFolder>>> {
    let folders = services.cache_folders.list().await?;
    Ok(Json(folders))
}

pub async fn update_cache_folder(
    State(services): State<Arc<CoreServices>>,
    AxumPath(folder_id): AxumPath<CacheFolderId>,
    Json(request): Json<UpdateCacheFolderRequest>,
) -> ApiResult<Json<CacheFolder>> {
    let mut folder = services
        .cache_folders
        .get_by_id(folder_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("cache folder {folder_id} not found")))?;

    if let Some(name) = request.name {
        folder.name = name;
    }
    if let Some(priority) = request.priority {
        folder.priority = priority;
    }
    if let Some(max_size_bytes) = request.max_size_bytes {
        folder.max_size_bytes = max_size_bytes;
    }
    if let Some(active) = request.active {
        folder.active = active;
    }

    let folder = services.cache_folders.update(folder).await?;
    Ok(Json(folder))
}

pub async fn delete_cache_folder(
    State(services): State<Arc<CoreServices>>,
    AxumPath(folder_id): AxumPath<CacheFolderId>,
) -> ApiResult<()> {
    let bound = services.cache_folders.count_bound_collections(folder_id).await?;
    if bound > 0 {
        return Err(ApiError::new(
            axum::http::StatusCode::CONFLICT,
            format!("cache folder {folder_id} still holds {bound} bound collection(s)"),
        ));
    }
    services.cache_folders.delete(folder_id).await?;
    Ok(())
}

pub async fn validate_cache_folder_path(
    Json(request): Json<ValidatePathRequest>,
) -> Json<ValidatePathResponse> {
    match CachePlacementEngine::write_probe(Path::new(&request.root_path)).await {
        Ok(()) => Json(ValidatePathResponse {
            writable: true,
            message: None,
        }),
        Err(err) => Json(ValidatePathResponse {
            writable: false,
            message: Some(err.to_string()),
        }),
    }
}
