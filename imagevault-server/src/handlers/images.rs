//! Image metadata and byte-serving routes: listing, direct lookup, raw
//! source bytes, generated thumbnails, and a collection's chosen cover.
//! The file-serving handlers follow the teacher's
//! `get_image_blob_handler` pattern: `If-None-Match`/`If-Modified-Since`
//! short-circuits, magic-byte content-type sniffing, and a streamed body.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use httpdate::{fmt_http_date, parse_http_date};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use imagevault_core::derivative::NetworkErrorTracker;
use imagevault_core::domain::{CollectionId, ImageId, ImageRecord, TargetFormat};
use imagevault_core::image_proc::{FitMode, ImageRef};
use imagevault_core::store::ImageSort;

use crate::errors::{ApiError, ApiResult};
use crate::handlers::image_validation::sniff_content_type;
use crate::state::CoreServices;

const DERIVATIVE_CACHE_CONTROL: &str = "public, max-age=86400";

#[derive(Debug, Deserialize)]
pub struct ListImagesQuery {
    #[serde(default)]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default)]
    sort: ImageSortParam,
}

fn default_page_size() -> u32 {
    100
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ImageSortParam {
    #[default]
    NameAsc,
    NameDesc,
    CreatedAsc,
    CreatedDesc,
}

impl From<ImageSortParam> for ImageSort {
    fn from(value: ImageSortParam) -> Self {
        match value {
            ImageSortParam::NameAsc => ImageSort::NameAsc,
            ImageSortParam::NameDesc => ImageSort::NameDesc,
            ImageSortParam::CreatedAsc => ImageSort::CreatedAsc,
            ImageSortParam::CreatedDesc => ImageSort::CreatedDesc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImageListResponse {
    images: Vec<ImageRecord>,
    page: u32,
    page_size: u32,
}

pub async fn list_images(
    State(services): State<Arc<CoreServices>>,
    AxumPath(collection_id): AxumPath<CollectionId>,
    Query(query): Query<ListImagesQuery>,
) -> ApiResult<Json<ImageListResponse>> {
    let images = services
        .images
        .list_by_collection(collection_id, query.page, query.page_size, query.sort.into())
        .await?;
    Ok(Json(ImageListResponse {
        images,
        page: query.page,
        page_size: query.page_size,
    }))
}

pub async fn get_image(
    State(services): State<Arc<CoreServices>>,
    AxumPath(image_id): AxumPath<ImageId>,
) -> ApiResult<Json<ImageRecord>> {
    let image = services
        .images
        .get_by_id(image_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("image {image_id} not found")))?;
    Ok(Json(image))
}

/// Optional on-the-fly transform: `?w=...&h=...` requests an inside-fit
/// resize (never upscaling) plus a JPEG re-encode at `quality` (default
/// the server's `cache_quality_default`). Omitting both query params
/// serves the original source bytes untouched.
#[derive(Debug, Default, Deserialize)]
pub struct GetImageBytesQuery {
    w: Option<u32>,
    h: Option<u32>,
    quality: Option<u8>,
}

pub async fn get_image_bytes(
    State(services): State<Arc<CoreServices>>,
    AxumPath(image_id): AxumPath<ImageId>,
    Query(query): Query<GetImageBytesQuery>,
) -> ApiResult<Response> {
    let image = services
        .images
        .get_by_id(image_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("image {image_id} not found")))?;
    let collection = services
        .collections
        .get_by_id(image.collection_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("collection {} not found", image.collection_id)))?;

    let resize_requested = query.w.is_some() || query.h.is_some();

    if !resize_requested && matches!(collection.source_kind, imagevault_core::domain::SourceKind::Folder) {
        let path = Path::new(&collection.source_path).join(&image.relative_path);
        return serve_path_streamed(&path, &image.source_format).await;
    }

    let image_ref = ImageRef {
        relative_path: &image.relative_path,
    };
    let source_bytes = services.processor.read_from_source(&collection, &image_ref).await?;

    if !resize_requested {
        let content_type = sniff_content_type(&source_bytes);
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, source_bytes.len().to_string())
            .body(Body::from(source_bytes))
            .unwrap());
    }

    let w = query.w.unwrap_or(image.width).max(1);
    let h = query.h.unwrap_or(image.height).max(1);
    let quality = query.quality.unwrap_or(services.config.cache_quality_default);

    let resized = services.processor.resize(&source_bytes, FitMode::Inside, w, h)?;
    let encoded = services.processor.encode(&resized, TargetFormat::Jpeg, quality)?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CONTENT_LENGTH, encoded.len().to_string())
        .body(Body::from(encoded))
        .unwrap())
}

pub async fn get_image_thumbnail(
    State(services): State<Arc<CoreServices>>,
    headers: HeaderMap,
    AxumPath(image_id): AxumPath<ImageId>,
) -> ApiResult<Response> {
    let image = services
        .images
        .get_by_id(image_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("image {image_id} not found")))?;
    let thumbnail_path = image
        .thumbnail_path
        .ok_or_else(|| ApiError::not_found(format!("image {image_id} has no thumbnail yet")))?;

    serve_derivative(&headers, Path::new(&thumbnail_path)).await
}

pub async fn get_collection_cover(
    State(services): State<Arc<CoreServices>>,
    headers: HeaderMap,
    AxumPath(collection_id): AxumPath<CollectionId>,
) -> ApiResult<Response> {
    use imagevault_core::derivative::cover::pick_cover;
    use imagevault_core::derivative::CoverCandidate;

    const PAGE_SIZE: u32 = 500;
    let mut page = 0u32;
    let mut candidates: Vec<(CoverCandidate, ImageRecord)> = Vec::new();
    loop {
        let batch = services
            .images
            .list_by_collection(collection_id, page, PAGE_SIZE, ImageSort::CreatedAsc)
            .await?;
        let batch_len = batch.len();
        for image in batch {
            if image.thumbnail_path.is_none() {
                continue;
            }
            candidates.push((
                CoverCandidate {
                    width: image.width,
                    height: image.height,
                    byte_size: image.byte_size,
                },
                image,
            ));
        }
        if (batch_len as u32) < PAGE_SIZE {
            break;
        }
        page += 1;
    }

    if candidates.is_empty() {
        return Err(ApiError::not_found(format!(
            "collection {collection_id} has no images with a thumbnail yet"
        )));
    }

    let scores: Vec<CoverCandidate> = candidates.iter().map(|(c, _)| *c).collect();
    let chosen_index = pick_cover(&scores)
        .and_then(|chosen| scores.iter().position(|c| std::ptr::eq(c, chosen)))
        .unwrap_or(0);
    let (_, image) = &candidates[chosen_index];

    let collection = services
        .collections
        .get_by_id(collection_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("collection {collection_id} not found")))?;

    let network_errors = NetworkErrorTracker::new(services.config.network_error_clamp_threshold);
    let cover_path = services
        .derivatives
        .generate_cover(&collection, image, &network_errors)
        .await?;

    serve_derivative(&headers, &cover_path).await
}

/// ETag (content path)/`Last-Modified` conditional-GET handling for a
/// derivative file already materialized on disk.
async fn serve_derivative(headers: &HeaderMap, path: &Path) -> ApiResult<Response> {
    let etag = format!("\"{}\"", path.display());

    if let Some(if_none_match) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if if_none_match.split(',').any(|t| t.trim() == etag) {
            return Ok(Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(header::ETAG, etag)
                .header(header::CACHE_CONTROL, DERIVATIVE_CACHE_CONTROL)
                .body(Body::empty())
                .unwrap());
        }
    }

    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| ApiError::not_found(format!("{} not found on disk", path.display())))?;
    let modified = meta.modified().unwrap_or(std::time::SystemTime::now());
    let last_modified = fmt_http_date(modified);

    if let Some(if_modified_since) = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
    {
        if let Ok(since_time) = parse_http_date(if_modified_since) {
            if modified <= since_time {
                return Ok(Response::builder()
                    .status(StatusCode::NOT_MODIFIED)
                    .header(header::ETAG, etag)
                    .header(header::LAST_MODIFIED, last_modified)
                    .header(header::CACHE_CONTROL, DERIVATIVE_CACHE_CONTROL)
                    .body(Body::empty())
                    .unwrap());
            }
        }
    }

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|_| ApiError::not_found(format!("{} not found on disk", path.display())))?;
    let content_type = sniff_head(path).await;
    let stream = ReaderStream::new(file);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, meta.len().to_string())
        .header(header::ETAG, etag)
        .header(header::LAST_MODIFIED, last_modified)
        .header(header::CACHE_CONTROL, DERIVATIVE_CACHE_CONTROL)
        .body(Body::from_stream(stream))
        .unwrap())
}

/// Streams an original-source file straight off disk for folder-backed
/// collections (archive-backed collections fall back to a buffered read,
/// since there is no standalone file to open).
async fn serve_path_streamed(path: &Path, fallback_format: &str) -> ApiResult<Response> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|_| ApiError::not_found(format!("{} not found on disk", path.display())))?;
    let meta = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found(format!("{} not found on disk", path.display())))?;
    let content_type = sniff_head(path).await;
    let content_type = if content_type == "application/octet-stream" && !fallback_format.is_empty() {
        mime_from_format(fallback_format)
    } else {
        content_type
    };
    let stream = ReaderStream::new(file);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, meta.len().to_string())
        .body(Body::from_stream(stream))
        .unwrap())
}

async fn sniff_head(path: &Path) -> &'static str {
    use tokio::io::AsyncReadExt;
    match tokio::fs::File::open(path).await {
        Ok(mut f) => {
            let mut head = [0u8; 16];
            let n = f.read(&mut head).await.unwrap_or(0);
            sniff_content_type(&head[..n])
        }
        Err(_) => "application/octet-stream",
    }
}

fn mime_from_format(format: &str) -> &'static str {
    match format {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
