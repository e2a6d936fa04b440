//! `cache` stage handler: produces the per-image cache derivative at the
//! requested target format/quality.
//! Terminal stage — never chains further.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use imagevault_core::cache_placement::CachePlacementEngine;
use imagevault_core::derivative::NetworkErrorTracker;
use imagevault_core::queue::WorkMessage;
use imagevault_core::store::ImageSort;
use imagevault_core::{CoreError, Result};
use tracing::{info, warn};

use crate::state::CoreServices;
use crate::workers::messages::{decode, CacheParams};

const PAGE_SIZE: u32 = 200;

pub async fn handle(services: &Arc<CoreServices>, message: &WorkMessage) -> Result<()> {
    let params: CacheParams = decode(&message.parameters)?;
    let collection_id = message
        .collection_id
        .ok_or_else(|| CoreError::InvalidInput("cache message missing collection_id".to_string()))?;

    let Some(collection) = services.collections.get_by_id(collection_id).await? else {
        return Err(CoreError::NotFound(collection_id.to_string()));
    };

    let cancelled = services.jobs.cancellation_flag(message.job_id);
    let network_errors = NetworkErrorTracker::new(services.config.network_error_clamp_threshold);
    let derivative_params = imagevault_core::derivative::DerivativeParams {
        target_format: params.target_format,
        target_quality: params.target_quality,
        overwrite: params.overwrite,
        thumbnail_w: services.config.thumbnail_w,
        thumbnail_h: services.config.thumbnail_h,
    };

    if params.overwrite {
        let folder = services.placement.place(collection_id, 0).await?;
        let dest_dir = CachePlacementEngine::collection_dir(&folder, collection_id);
        let mut all_images = Vec::new();
        let mut reset_page = 0u32;
        loop {
            let batch = services
                .images
                .list_by_collection(collection_id, reset_page, PAGE_SIZE, ImageSort::CreatedAsc)
                .await?;
            let batch_len = batch.len();
            all_images.extend(batch);
            if (batch_len as u32) < PAGE_SIZE {
                break;
            }
            reset_page += 1;
        }
        services
            .derivatives
            .reset_for_overwrite(collection_id, &dest_dir, &mut all_images)
            .await?;
    }

    let total = services.images.count_by_collection(collection_id).await?;
    let mut completed = 0u64;
    let mut page = 0u32;

    'pages: loop {
        let batch = services
            .images
            .list_by_collection(collection_id, page, PAGE_SIZE, ImageSort::CreatedAsc)
            .await?;
        let batch_len = batch.len();

        for mut image in batch {
            if services.jobs.is_cancelled(message.job_id) {
                info!(job_id = %message.job_id, %collection_id, "cache stage observed cancellation");
                break 'pages;
            }

            match services
                .derivatives
                .generate_cache(&collection, &mut image, &derivative_params, &cancelled, &network_errors)
                .await
            {
                Ok(_) => completed += 1,
                Err(err) => {
                    warn!(%err, image_id = %image.id, "cache generation failed");
                    services
                        .jobs
                        .record_item_error(message.job_id, format!("cache:{}", image.id), &err)
                        .await?;
                }
            }
        }

        if (batch_len as u32) < PAGE_SIZE {
            break;
        }
        page += 1;
    }

    services
        .jobs
        .record_progress(message.job_id, "cache", completed, Some(total), None)
        .await?;

    info!(job_id = %message.job_id, %collection_id, completed, total, "cache stage complete");
    Ok(())
}
