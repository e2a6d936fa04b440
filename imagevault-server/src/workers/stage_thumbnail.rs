//! `thumbnail` stage handler: produces the per-image `_thumb.jpg` derivative
//! for every image in a collection.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use imagevault_core::derivative::NetworkErrorTracker;
use imagevault_core::queue::WorkMessage;
use imagevault_core::store::ImageSort;
use imagevault_core::{CoreError, Result};
use tracing::{info, warn};

use crate::state::CoreServices;
use crate::workers::messages::{decode, CacheParams, ThumbnailParams};

const PAGE_SIZE: u32 = 200;

pub async fn handle(services: &Arc<CoreServices>, message: &WorkMessage) -> Result<()> {
    let params: ThumbnailParams = decode(&message.parameters)?;
    let collection_id = message
        .collection_id
        .ok_or_else(|| CoreError::InvalidInput("thumbnail message missing collection_id".to_string()))?;

    let Some(collection) = services.collections.get_by_id(collection_id).await? else {
        return Err(CoreError::NotFound(collection_id.to_string()));
    };

    let cancelled = services.jobs.cancellation_flag(message.job_id);
    let network_errors = NetworkErrorTracker::new(services.config.network_error_clamp_threshold);
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
            if services.jobs.is_cancelled(message.job_id) || cancelled.load(Ordering::SeqCst) {
                info!(job_id = %message.job_id, %collection_id, "thumbnail stage observed cancellation");
                break 'pages;
            }

            if !params.force_regen && image.thumbnail_path.is_some() {
                completed += 1;
                continue;
            }

            match services
                .derivatives
                .generate_thumbnail(&collection, &mut image, params.w, params.h, &network_errors)
                .await
            {
                Ok(_) => completed += 1,
                Err(err) => {
                    warn!(%err, image_id = %image.id, "thumbnail generation failed");
                    services
                        .jobs
                        .record_item_error(message.job_id, format!("thumbnail:{}", image.id), &err)
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
        .record_progress(message.job_id, "thumbnail", completed, Some(total), None)
        .await?;

    info!(job_id = %message.job_id, %collection_id, completed, total, "thumbnail stage complete");

    if params.chain {
        let cache_params = CacheParams {
            target_format: imagevault_core::domain::TargetFormat::from_name(&services.config.cache_format_default)
                .unwrap_or(imagevault_core::domain::TargetFormat::Jpeg),
            target_quality: services.config.cache_quality_default,
            overwrite: false,
        };
        let parameters = serde_json::to_value(&cache_params).map_err(CoreError::Serialization)?;
        let cache_message = WorkMessage {
            job_id: message.job_id,
            stage: "cache".to_string(),
            collection_id: Some(collection_id),
            image_ref: None,
            parameters,
            attempt: 0,
            message_kind: "CacheGeneration".to_string(),
        };
        services.queue.publish("cache", cache_message).await?;
    }

    Ok(())
}
