use std::sync::Arc;

use imagevault_core::cache_placement::CachePlacementEngine;
use imagevault_core::derivative::DerivativeGenerator;
use imagevault_core::image_proc::ImageProcessor;
use imagevault_core::jobs::JobManager;
use imagevault_core::queue::WorkQueue;
use imagevault_core::store::{CacheFolderStore, CollectionStore, ImageStore, JobStore, StatsStore};
use imagevault_core::CoreConfig;

/// The single explicit, clonable handle every worker and HTTP handler is
/// built from (SPEC_FULL §2: "no global/static state"). Constructed once
/// in `main` and handed to Axum as `State<Arc<CoreServices>>`.
#[derive(Clone)]
pub struct CoreServices {
    pub collections: Arc<dyn CollectionStore>,
    pub images: Arc<dyn ImageStore>,
    pub cache_folders: Arc<dyn CacheFolderStore>,
    pub jobs_store: Arc<dyn JobStore>,
    pub stats: Arc<dyn StatsStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub jobs: Arc<JobManager>,
    pub placement: Arc<CachePlacementEngine>,
    pub derivatives: Arc<DerivativeGenerator>,
    pub processor: Arc<dyn ImageProcessor>,
    pub config: CoreConfig,
}
