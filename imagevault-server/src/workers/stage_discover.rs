//! `discover` stage handler: turns a parent root into ingested collections.

use std::path::Path;
use std::sync::Arc;

use imagevault_core::discovery::find_collections;
use imagevault_core::domain::Collection;
use imagevault_core::queue::WorkMessage;
use imagevault_core::CoreError;
use tracing::{info, warn};

use crate::state::CoreServices;
use crate::workers::messages::{decode, DiscoverParams, ScanParams};

/// Runs the `discover` stage for one delivered message: walks
/// `parent_root`, ingests new candidates (deduplicated by `(path, kind)`
/// per spec.md §3 invariant), and — when `chain` is set — publishes a
/// `scan` message for every collection newly created by this run.
pub async fn handle(services: &Arc<CoreServices>, message: &WorkMessage) -> imagevault_core::Result<()> {
    let params: DiscoverParams = decode(&message.parameters)?;
    let root = Path::new(&params.parent_root);

    let candidates = find_collections(
        root,
        params.include_subfolders,
        &params.prefix,
        &services.config,
    )?;

    let mut ingested = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        match services.collections.get_by_path(&candidate.path).await? {
            Some(existing) => {
                ingested.push((existing, false));
            }
            None => {
                let mut collection = Collection::new(&candidate.display_name, &candidate.path, candidate.kind);
                collection.library_id = params.library_id.clone();
                let created = services.collections.create(collection).await?;
                ingested.push((created, true));
            }
        }
    }

    let new_count = ingested.iter().filter(|(_, is_new)| *is_new).count();
    info!(
        job_id = %message.job_id,
        candidates = candidates.len(),
        new_collections = new_count,
        "discover stage ingested candidates"
    );

    services
        .jobs
        .record_progress(
            message.job_id,
            "discover",
            candidates.len() as u64,
            Some(candidates.len() as u64),
            None,
        )
        .await?;

    if params.chain {
        for (collection, is_new) in ingested.into_iter().filter(|(_, is_new)| *is_new) {
            let scan_params = ScanParams {
                force_rescan: false,
                chain: true,
            };
            let parameters = serde_json::to_value(&scan_params).map_err(CoreError::Serialization)?;
            let scan_message = WorkMessage {
                job_id: message.job_id,
                stage: "scan".to_string(),
                collection_id: Some(collection.id),
                image_ref: None,
                parameters,
                attempt: 0,
                message_kind: "CollectionScan".to_string(),
            };
            if let Err(err) = services.queue.publish("scan", scan_message).await {
                warn!(%err, collection_id = %collection.id, "failed to chain scan stage after discovery");
            }
            let _ = is_new;
        }
    }

    Ok(())
}
