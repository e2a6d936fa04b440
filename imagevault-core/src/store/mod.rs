//! Metadata Store Facade (C9): the four port traits the rest of the core
//! depends on, plus the implementations that satisfy them.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    CacheFolder, CacheFolderBinding, CacheFolderId, Collection, CollectionId, Job, JobId,
    JobStatus, ImageId, ImageRecord, StageStatus,
};
use crate::error::{ItemError, Result};

pub use memory::InMemoryStore;

#[derive(Debug, Clone, Copy)]
pub enum ImageSort {
    NameAsc,
    NameDesc,
    CreatedAsc,
    CreatedDesc,
}

#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub status: Option<JobStatus>,
    pub since: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn create(&self, collection: Collection) -> Result<Collection>;
    async fn update(&self, collection: Collection) -> Result<Collection>;
    async fn delete(&self, id: CollectionId) -> Result<()>;
    async fn get_by_id(&self, id: CollectionId) -> Result<Option<Collection>>;
    async fn get_by_path(&self, path: &str) -> Result<Option<Collection>>;
    async fn list(&self, page: u32, page_size: u32) -> Result<Vec<Collection>>;
    async fn count(&self) -> Result<u64>;
    /// Stable-order index lookup (resolves the Open Question in favor of an
    /// `OFFSET`-style strategy over `ORDER BY random()`).
    async fn random_by_index(&self, i: u64) -> Result<Option<Collection>>;
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn create(&self, image: ImageRecord) -> Result<ImageRecord>;
    async fn update(&self, image: ImageRecord) -> Result<ImageRecord>;
    async fn delete(&self, id: ImageId) -> Result<()>;
    async fn list_by_collection(
        &self,
        collection_id: CollectionId,
        page: u32,
        page_size: u32,
        sort: ImageSort,
    ) -> Result<Vec<ImageRecord>>;
    async fn count_by_collection(&self, collection_id: CollectionId) -> Result<u64>;
    async fn get_embedded(&self, collection_id: CollectionId, image_id: ImageId) -> Result<Option<ImageRecord>>;
    /// Lookup by id alone, for routes that address an image directly
    /// without its collection in scope.
    async fn get_by_id(&self, image_id: ImageId) -> Result<Option<ImageRecord>>;
}

#[async_trait]
pub trait CacheFolderStore: Send + Sync {
    async fn create(&self, folder: CacheFolder) -> Result<CacheFolder>;
    async fn update(&self, folder: CacheFolder) -> Result<CacheFolder>;
    async fn delete(&self, id: CacheFolderId) -> Result<()>;
    async fn get_by_id(&self, id: CacheFolderId) -> Result<Option<CacheFolder>>;
    async fn list(&self) -> Result<Vec<CacheFolder>>;
    /// MUST be serialized per folder id.
    async fn adjust_usage(&self, id: CacheFolderId, delta_size: i64, delta_count: i64) -> Result<()>;
    async fn pick_for_collection(&self, collection_id: CollectionId) -> Result<Option<CacheFolder>>;
    async fn bind(&self, collection_id: CollectionId, folder_id: CacheFolderId) -> Result<()>;
    async fn get_binding(&self, collection_id: CollectionId) -> Result<Option<CacheFolderBinding>>;
    /// Number of collections currently bound to `id`. A cache folder MUST
    /// NOT be deleted while this is non-zero (spec.md §3: "deleted only
    /// when it holds no bound collections").
    async fn count_bound_collections(&self, id: CacheFolderId) -> Result<u64>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<Job>;
    async fn get(&self, id: JobId) -> Result<Option<Job>>;
    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<()>;
    async fn update_stage(
        &self,
        id: JobId,
        stage_name: &str,
        status: StageStatus,
        completed: u64,
        total: u64,
        message: Option<String>,
    ) -> Result<()>;
    async fn list(&self, filter: JobListFilter) -> Result<Vec<Job>>;
    async fn delete_older_than(&self, age: std::time::Duration) -> Result<u64>;
    /// Appends one entry to the job's `error_log`: per-item faults
    /// accumulate here rather than failing the job.
    async fn append_error(&self, id: JobId, error: ItemError) -> Result<()>;
}

/// Per-folder usage rollup.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheFolderUsage {
    pub folder_id: CacheFolderId,
    pub current_size_bytes: u64,
    pub current_file_count: u64,
    pub max_size_bytes: Option<u64>,
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn cache_distribution(&self) -> Result<Vec<CacheFolderUsage>>;
    async fn collection_activity(&self, since: DateTime<Utc>) -> Result<Vec<(CollectionId, DateTime<Utc>)>>;
}
