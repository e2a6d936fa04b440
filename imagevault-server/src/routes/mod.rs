//! Route composition: one sub-router per resource, merged into a single
//! `Router<Arc<CoreServices>>` the way the teacher composes its versioned
//! API router from per-domain pieces.

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::handlers::{cache_folders, collections, discovery, images, jobs, stats};
use crate::state::CoreServices;

pub fn create_router() -> Router<std::sync::Arc<CoreServices>> {
    Router::new()
        .merge(discovery_routes())
        .merge(job_routes())
        .merge(cache_folder_routes())
        .merge(collection_routes())
        .merge(image_routes())
        .merge(stats_routes())
}

fn discovery_routes() -> Router<std::sync::Arc<CoreServices>> {
    Router::new().route("/discovery", post(discovery::submit_discovery))
}

fn job_routes() -> Router<std::sync::Arc<CoreServices>> {
    Router::new()
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
}

fn cache_folder_routes() -> Router<std::sync::Arc<CoreServices>> {
    Router::new()
        .route(
            "/cache-folders",
            post(cache_folders::create_cache_folder).get(cache_folders::list_cache_folders),
        )
        .route(
            "/cache-folders/{id}",
            put(cache_folders::update_cache_folder).delete(cache_folders::delete_cache_folder),
        )
        .route(
            "/cache-folders/validate",
            post(cache_folders::validate_cache_folder_path),
        )
}

fn collection_routes() -> Router<std::sync::Arc<CoreServices>> {
    Router::new()
        .route("/collections", get(collections::list_collections))
        .route(
            "/collections/{id}",
            get(collections::get_collection).delete(collections::delete_collection),
        )
        .route("/collections/{id}/rescan", post(collections::rescan_collection))
        .route(
            "/collections/{id}/regenerate-thumbnails",
            post(collections::regenerate_thumbnails),
        )
}

fn image_routes() -> Router<std::sync::Arc<CoreServices>> {
    Router::new()
        .route("/collections/{id}/images", get(images::list_images))
        .route("/images/{id}", get(images::get_image))
        .route("/images/{id}/bytes", get(images::get_image_bytes))
        .route("/images/{id}/thumbnail", get(images::get_image_thumbnail))
        .route("/collections/{id}/cover", get(images::get_collection_cover))
}

fn stats_routes() -> Router<std::sync::Arc<CoreServices>> {
    Router::new()
        .route("/stats/cache", get(stats::cache_distribution))
        .route("/stats/cache/{folder_id}", get(stats::cache_distribution_for_folder))
}
