use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::{
    CacheFolder, CacheFolderBinding, CacheFolderId, Collection, CollectionId, Job, JobId,
    JobStatus, ImageId, ImageRecord, StageStatus,
};
use crate::error::Result;

use super::{
    CacheFolderStore, CacheFolderUsage, CollectionStore, ImageSort, ImageStore, JobListFilter,
    JobStore, StatsStore,
};

/// `dashmap`-backed implementation of all four store ports, used by default
/// when no database is configured and throughout the test suite.
/// Per-shard locking gives thread-safety for concurrent job-manager access
/// without a crate-wide mutex.
#[derive(Default)]
pub struct InMemoryStore {
    collections: DashMap<CollectionId, Collection>,
    /// Insertion order, for `random_by_index`'s stable-order lookup.
    collection_order: DashMap<u64, CollectionId>,
    collection_seq: AtomicU64,

    images: DashMap<ImageId, ImageRecord>,

    cache_folders: DashMap<CacheFolderId, CacheFolder>,
    bindings: DashMap<CollectionId, CacheFolderId>,

    jobs: DashMap<JobId, Job>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionStore for InMemoryStore {
    async fn create(&self, collection: Collection) -> Result<Collection> {
        let idx = self.collection_seq.fetch_add(1, Ordering::SeqCst);
        self.collection_order.insert(idx, collection.id);
        self.collections.insert(collection.id, collection.clone());
        Ok(collection)
    }

    async fn update(&self, collection: Collection) -> Result<Collection> {
        self.collections.insert(collection.id, collection.clone());
        Ok(collection)
    }

    async fn delete(&self, id: CollectionId) -> Result<()> {
        self.collections.remove(&id);
        Ok(())
    }

    async fn get_by_id(&self, id: CollectionId) -> Result<Option<Collection>> {
        Ok(self.collections.get(&id).map(|r| r.clone()))
    }

    async fn get_by_path(&self, path: &str) -> Result<Option<Collection>> {
        Ok(self
            .collections
            .iter()
            .find(|r| r.source_path == path)
            .map(|r| r.clone()))
    }

    async fn list(&self, page: u32, page_size: u32) -> Result<Vec<Collection>> {
        let skip = (page as usize) * (page_size as usize);
        Ok(self
            .collections
            .iter()
            .map(|r| r.clone())
            .skip(skip)
            .take(page_size as usize)
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.collections.len() as u64)
    }

    async fn random_by_index(&self, i: u64) -> Result<Option<Collection>> {
        let Some(id) = self.collection_order.get(&i).map(|r| *r) else {
            return Ok(None);
        };
        Ok(self.collections.get(&id).map(|r| r.clone()))
    }
}

#[async_trait]
impl ImageStore for InMemoryStore {
    async fn create(&self, image: ImageRecord) -> Result<ImageRecord> {
        self.images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn update(&self, image: ImageRecord) -> Result<ImageRecord> {
        self.images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn delete(&self, id: ImageId) -> Result<()> {
        self.images.remove(&id);
        Ok(())
    }

    async fn list_by_collection(
        &self,
        collection_id: CollectionId,
        page: u32,
        page_size: u32,
        sort: ImageSort,
    ) -> Result<Vec<ImageRecord>> {
        let mut matching: Vec<ImageRecord> = self
            .images
            .iter()
            .filter(|r| r.collection_id == collection_id)
            .map(|r| r.clone())
            .collect();

        match sort {
            ImageSort::NameAsc => matching.sort_by(|a, b| a.filename.cmp(&b.filename)),
            ImageSort::NameDesc => matching.sort_by(|a, b| b.filename.cmp(&a.filename)),
            ImageSort::CreatedAsc => matching.sort_by_key(|r| r.id.as_uuid()),
            ImageSort::CreatedDesc => {
                matching.sort_by_key(|r| std::cmp::Reverse(r.id.as_uuid()))
            }
        }

        let skip = (page as usize) * (page_size as usize);
        Ok(matching.into_iter().skip(skip).take(page_size as usize).collect())
    }

    async fn count_by_collection(&self, collection_id: CollectionId) -> Result<u64> {
        Ok(self
            .images
            .iter()
            .filter(|r| r.collection_id == collection_id)
            .count() as u64)
    }

    async fn get_embedded(
        &self,
        collection_id: CollectionId,
        image_id: ImageId,
    ) -> Result<Option<ImageRecord>> {
        Ok(self
            .images
            .get(&image_id)
            .filter(|r| r.collection_id == collection_id)
            .map(|r| r.clone()))
    }

    async fn get_by_id(&self, image_id: ImageId) -> Result<Option<ImageRecord>> {
        Ok(self.images.get(&image_id).map(|r| r.clone()))
    }
}

#[async_trait]
impl CacheFolderStore for InMemoryStore {
    async fn create(&self, folder: CacheFolder) -> Result<CacheFolder> {
        self.cache_folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    async fn update(&self, folder: CacheFolder) -> Result<CacheFolder> {
        self.cache_folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    async fn delete(&self, id: CacheFolderId) -> Result<()> {
        self.cache_folders.remove(&id);
        Ok(())
    }

    async fn get_by_id(&self, id: CacheFolderId) -> Result<Option<CacheFolder>> {
        Ok(self.cache_folders.get(&id).map(|r| r.clone()))
    }

    async fn list(&self) -> Result<Vec<CacheFolder>> {
        Ok(self.cache_folders.iter().map(|r| r.clone()).collect())
    }

    async fn adjust_usage(&self, id: CacheFolderId, delta_size: i64, delta_count: i64) -> Result<()> {
        // `DashMap::entry` holds the shard lock for the duration of the
        // closure, which is what gives this its per-folder serialization.
        if let Some(mut folder) = self.cache_folders.get_mut(&id) {
            folder.adjust_usage(delta_size, delta_count);
        }
        Ok(())
    }

    async fn pick_for_collection(&self, collection_id: CollectionId) -> Result<Option<CacheFolder>> {
        if let Some(folder_id) = self.bindings.get(&collection_id).map(|r| *r) {
            return self.get_by_id(folder_id).await;
        }
        Ok(None)
    }

    async fn bind(&self, collection_id: CollectionId, folder_id: CacheFolderId) -> Result<()> {
        self.bindings.insert(collection_id, folder_id);
        Ok(())
    }

    async fn get_binding(&self, collection_id: CollectionId) -> Result<Option<CacheFolderBinding>> {
        Ok(self.bindings.get(&collection_id).map(|r| CacheFolderBinding {
            collection_id,
            cache_folder_id: *r,
        }))
    }

    async fn count_bound_collections(&self, id: CacheFolderId) -> Result<u64> {
        Ok(self.bindings.iter().filter(|r| *r.value() == id).count() as u64)
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create(&self, job: Job) -> Result<Job> {
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.get(&id).map(|r| r.clone()))
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.status = status;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_stage(
        &self,
        id: JobId,
        stage_name: &str,
        status: StageStatus,
        completed: u64,
        total: u64,
        message: Option<String>,
    ) -> Result<()> {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            if let Some(stage) = job.stages.get_mut(stage_name) {
                stage.status = status;
                stage.completed_items = completed;
                stage.total_items = total;
                stage.message = message;
            }
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list(&self, filter: JobListFilter) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .iter()
            .map(|r| r.clone())
            .filter(|job| filter.status.map(|s| s == job.status).unwrap_or(true))
            .filter(|job| filter.since.map(|since| job.created_at >= since).unwrap_or(true))
            .collect())
    }

    async fn append_error(&self, id: JobId, error: crate::error::ItemError) -> Result<()> {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.error_log.push(error);
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_older_than(&self, age: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(age).unwrap_or(chrono::Duration::zero());
        let to_remove: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|r| r.status.is_terminal() && r.updated_at < cutoff)
            .map(|r| r.id)
            .collect();
        let removed = to_remove.len() as u64;
        for id in to_remove {
            self.jobs.remove(&id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl StatsStore for InMemoryStore {
    async fn cache_distribution(&self) -> Result<Vec<CacheFolderUsage>> {
        Ok(self
            .cache_folders
            .iter()
            .map(|r| CacheFolderUsage {
                folder_id: r.id,
                current_size_bytes: r.current_size_bytes,
                current_file_count: r.current_file_count,
                max_size_bytes: r.max_size_bytes,
            })
            .collect())
    }

    async fn collection_activity(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(CollectionId, DateTime<Utc>)>> {
        Ok(self
            .collections
            .iter()
            .filter(|r| r.updated_at >= since)
            .map(|r| (r.id, r.updated_at))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceKind;

    #[tokio::test]
    async fn random_by_index_uses_stable_insertion_order() {
        let store = InMemoryStore::new();
        let first = Collection::new("A", "/a", SourceKind::Folder);
        let second = Collection::new("B", "/b", SourceKind::Folder);
        store.create(first.clone()).await.unwrap();
        store.create(second.clone()).await.unwrap();

        assert_eq!(store.random_by_index(0).await.unwrap().unwrap().id, first.id);
        assert_eq!(store.random_by_index(1).await.unwrap().unwrap().id, second.id);
        assert!(store.random_by_index(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adjust_usage_mutates_in_place() {
        let store = InMemoryStore::new();
        let folder = CacheFolder::new("F1", "/mnt/f1", 10);
        let id = folder.id;
        store.create(folder).await.unwrap();

        store.adjust_usage(id, 1024, 1).await.unwrap();
        let updated = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(updated.current_size_bytes, 1024);
        assert_eq!(updated.current_file_count, 1);
    }

    #[tokio::test]
    async fn delete_older_than_only_removes_terminal_jobs() {
        use crate::domain::JobKind;

        let store = InMemoryStore::new();
        let mut job = Job::new(JobKind::Discovery, None);
        job.cancel();
        job.updated_at = Utc::now() - chrono::Duration::hours(3);
        let id = job.id;
        store.create(job).await.unwrap();

        let removed = store.delete_older_than(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(id).await.unwrap().is_none());
    }
}
