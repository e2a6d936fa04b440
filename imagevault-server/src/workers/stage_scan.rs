//! `scan` stage handler: enumerates a collection's images (folder walk or
//! archive listing) and materializes `ImageRecord`s incrementally.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use imagevault_core::archive::reader_for;
use imagevault_core::domain::{Collection, ImageRecord, SourceKind};
use imagevault_core::fs::{walk, EntryKind};
use imagevault_core::image_proc::ImageRef;
use imagevault_core::queue::WorkMessage;
use imagevault_core::store::ImageSort;
use imagevault_core::{CoreError, Result};
use tracing::{info, warn};

use crate::state::CoreServices;
use crate::workers::messages::{decode, ScanParams, ThumbnailParams};

struct FoundImage {
    relative_path: String,
    filename: String,
    byte_size: u64,
}

pub async fn handle(services: &Arc<CoreServices>, message: &WorkMessage) -> Result<()> {
    let params: ScanParams = decode(&message.parameters)?;
    let collection_id = message
        .collection_id
        .ok_or_else(|| CoreError::InvalidInput("scan message missing collection_id".to_string()))?;

    let Some(mut collection) = services.collections.get_by_id(collection_id).await? else {
        return Err(CoreError::NotFound(collection_id.to_string()));
    };

    let found = enumerate_images(&collection, &services.config)?;

    let existing_paths = existing_relative_paths(services, collection_id).await?;

    let mut created = 0u64;
    for item in &found {
        if !params.force_rescan && existing_paths.contains(&item.relative_path) {
            continue;
        }

        let image_ref = ImageRef {
            relative_path: &item.relative_path,
        };
        let mut record = ImageRecord::new(collection_id, &item.filename, &item.relative_path, item.byte_size);

        match services.processor.read_from_source(&collection, &image_ref).await {
            Ok(bytes) => match services.processor.probe(&bytes, services.config.probe_timeout(), services.config.max_input_pixels).await {
                Ok(probe) => {
                    record.width = probe.width;
                    record.height = probe.height;
                    record.source_format = probe.format.to_string();
                }
                Err(err) => {
                    warn!(%err, path = %item.relative_path, "probe failed during scan, recording image without dimensions");
                    services
                        .jobs
                        .record_item_error(message.job_id, format!("scan:{}", item.relative_path), &err)
                        .await?;
                }
            },
            Err(err) => {
                warn!(%err, path = %item.relative_path, "failed to read source during scan");
                services
                    .jobs
                    .record_item_error(message.job_id, format!("scan:{}", item.relative_path), &err)
                    .await?;
                continue;
            }
        }

        services.images.create(record).await?;
        created += 1;
    }

    collection.settings.total_images = services.images.count_by_collection(collection_id).await?;
    collection.settings.last_scanned = Some(chrono::Utc::now());
    services.collections.update(collection).await?;

    info!(job_id = %message.job_id, %collection_id, found = found.len(), created, "scan stage complete");

    services
        .jobs
        .record_progress(message.job_id, "scan", 1, Some(1), None)
        .await?;

    if params.chain {
        let thumb_params = ThumbnailParams {
            w: services.config.thumbnail_w,
            h: services.config.thumbnail_h,
            force_regen: false,
            chain: true,
        };
        let parameters = serde_json::to_value(&thumb_params).map_err(CoreError::Serialization)?;
        let thumb_message = WorkMessage {
            job_id: message.job_id,
            stage: "thumbnail".to_string(),
            collection_id: Some(collection_id),
            image_ref: None,
            parameters,
            attempt: 0,
            message_kind: "ThumbnailGeneration".to_string(),
        };
        services.queue.publish("thumbnail", thumb_message).await?;
    }

    Ok(())
}

fn enumerate_images(collection: &Collection, config: &imagevault_core::CoreConfig) -> Result<Vec<FoundImage>> {
    match collection.source_kind {
        SourceKind::Folder => {
            let root = Path::new(&collection.source_path);
            let max_depth = config.max_depth(true);
            let entries = walk(root, max_depth, config);
            Ok(entries
                .into_iter()
                .filter(|e| matches!(e.kind, EntryKind::File))
                .filter(|e| is_supported_image(&e.name, config))
                .map(|e| FoundImage {
                    relative_path: e.relative_path.to_string_lossy().replace('\\', "/"),
                    filename: e.name,
                    byte_size: std::fs::metadata(&e.absolute_path).map(|m| m.len()).unwrap_or(0),
                })
                .collect())
        }
        kind => {
            let reader = reader_for(kind)?;
            let entries = reader.list_entries(Path::new(&collection.source_path))?;
            Ok(entries
                .into_iter()
                .filter(|e| !e.is_directory)
                .filter(|e| is_supported_image(&e.name, config))
                .map(|e| {
                    let filename = Path::new(&e.name)
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or(&e.name)
                        .to_string();
                    FoundImage {
                        relative_path: e.name,
                        filename,
                        byte_size: e.byte_size,
                    }
                })
                .collect())
        }
    }
}

fn is_supported_image(name: &str, config: &imagevault_core::CoreConfig) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            config.supported_image_formats.iter().any(|s| s == &lower)
        })
        .unwrap_or(false)
}

async fn existing_relative_paths(
    services: &Arc<CoreServices>,
    collection_id: imagevault_core::domain::CollectionId,
) -> Result<HashSet<String>> {
    let mut set = HashSet::new();
    let mut page = 0u32;
    const PAGE_SIZE: u32 = 500;
    loop {
        let batch = services
            .images
            .list_by_collection(collection_id, page, PAGE_SIZE, ImageSort::CreatedAsc)
            .await?;
        let len = batch.len();
        for image in batch {
            set.insert(image.relative_path);
        }
        if (len as u32) < PAGE_SIZE {
            break;
        }
        page += 1;
    }
    Ok(set)
}
