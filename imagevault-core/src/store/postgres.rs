//! `sqlx::PgPool`-backed Metadata Store Facade (C9), grounded in the
//! teacher's `database/infrastructure/postgres/repositories/*.rs` style:
//! one small struct per port wrapping a pool, manual row mapping, and
//! `tracing::warn!` around recoverable faults.
//!
//! Written against runtime `sqlx::query`/`query_as` rather than the
//! compile-time-checked `sqlx::query!` macro: that
//! macro validates against either a live database or a committed
//! `.sqlx` offline cache at compile time, neither of which is available
//! here. The schema this module expects lives in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::domain::{
    CacheFolder, CacheFolderBinding, CacheFolderId, Collection, CollectionId, CollectionSettings,
    ImageId, ImageRecord, Job, JobId, JobKind, JobStatus, SourceKind, StageState, StageStatus,
    TargetFormat,
};
use crate::error::{CoreError, ItemError, Result};

use super::{
    CacheFolderStore, CacheFolderUsage, CollectionStore, ImageSort, ImageStore, JobListFilter,
    JobStore, StatsStore,
};

#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the bundled migrations. Call once at startup before serving
    /// traffic.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::MetadataStoreUnavailable(e.to_string()))
    }
}

fn source_kind_to_str(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Folder => "folder",
        SourceKind::Zip => "zip",
        SourceKind::SevenZ => "sevenz",
        SourceKind::Rar => "rar",
        SourceKind::Tar => "tar",
    }
}

fn source_kind_from_str(s: &str) -> SourceKind {
    match s {
        "zip" => SourceKind::Zip,
        "sevenz" => SourceKind::SevenZ,
        "rar" => SourceKind::Rar,
        "tar" => SourceKind::Tar,
        _ => SourceKind::Folder,
    }
}

fn collection_from_row(row: &sqlx::postgres::PgRow) -> Result<Collection> {
    Ok(Collection {
        id: CollectionId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        source_path: row.try_get("source_path")?,
        source_kind: source_kind_from_str(row.try_get::<String, _>("source_kind")?.as_str()),
        library_id: row.try_get("library_id")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
        settings: CollectionSettings {
            total_images: row.try_get::<i64, _>("total_images")? as u64,
            last_scanned: row.try_get("last_scanned")?,
        },
    })
}

#[async_trait]
impl CollectionStore for PostgresStore {
    async fn create(&self, collection: Collection) -> Result<Collection> {
        let row = sqlx::query(
            r#"
            INSERT INTO collections
                (id, name, source_path, source_kind, library_id, active,
                 created_at, updated_at, deleted_at, total_images, last_scanned)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(collection.id.as_uuid())
        .bind(&collection.name)
        .bind(&collection.source_path)
        .bind(source_kind_to_str(collection.source_kind))
        .bind(&collection.library_id)
        .bind(collection.active)
        .bind(collection.created_at)
        .bind(collection.updated_at)
        .bind(collection.deleted_at)
        .bind(collection.settings.total_images as i64)
        .bind(collection.settings.last_scanned)
        .fetch_one(&self.pool)
        .await?;
        collection_from_row(&row)
    }

    async fn update(&self, collection: Collection) -> Result<Collection> {
        let row = sqlx::query(
            r#"
            UPDATE collections SET
                name = $2, source_path = $3, source_kind = $4, library_id = $5,
                active = $6, updated_at = $7, deleted_at = $8,
                total_images = $9, last_scanned = $10
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(collection.id.as_uuid())
        .bind(&collection.name)
        .bind(&collection.source_path)
        .bind(source_kind_to_str(collection.source_kind))
        .bind(&collection.library_id)
        .bind(collection.active)
        .bind(Utc::now())
        .bind(collection.deleted_at)
        .bind(collection.settings.total_images as i64)
        .bind(collection.settings.last_scanned)
        .fetch_one(&self.pool)
        .await?;
        collection_from_row(&row)
    }

    async fn delete(&self, id: CollectionId) -> Result<()> {
        sqlx::query("DELETE FROM collections WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: CollectionId) -> Result<Option<Collection>> {
        let row = sqlx::query("SELECT * FROM collections WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(collection_from_row).transpose()
    }

    async fn get_by_path(&self, path: &str) -> Result<Option<Collection>> {
        let row = sqlx::query("SELECT * FROM collections WHERE source_path = $1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(collection_from_row).transpose()
    }

    async fn list(&self, page: u32, page_size: u32) -> Result<Vec<Collection>> {
        let offset = (page as i64) * (page_size as i64);
        let rows = sqlx::query("SELECT * FROM collections ORDER BY id LIMIT $1 OFFSET $2")
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(collection_from_row).collect()
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM collections")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    /// Index into a stable `ORDER BY id` ordering via `OFFSET`, rather than
    /// `ORDER BY random()`, so repeated calls with the same index are stable.
    async fn random_by_index(&self, i: u64) -> Result<Option<Collection>> {
        let row = sqlx::query("SELECT * FROM collections ORDER BY id OFFSET $1 LIMIT 1")
            .bind(i as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(collection_from_row).transpose()
    }
}

fn image_from_row(row: &sqlx::postgres::PgRow) -> Result<ImageRecord> {
    let cache_format: Option<String> = row.try_get("cache_format")?;
    Ok(ImageRecord {
        id: ImageId::from_uuid(row.try_get("id")?),
        collection_id: CollectionId::from_uuid(row.try_get("collection_id")?),
        filename: row.try_get("filename")?,
        relative_path: row.try_get("relative_path")?,
        byte_size: row.try_get::<i64, _>("byte_size")? as u64,
        width: row.try_get::<i32, _>("width")? as u32,
        height: row.try_get::<i32, _>("height")? as u32,
        source_format: row.try_get("source_format")?,
        thumbnail_path: row.try_get("thumbnail_path")?,
        cache_path: row.try_get("cache_path")?,
        cache_filename: row.try_get("cache_filename")?,
        cache_quality: row
            .try_get::<Option<i16>, _>("cache_quality")?
            .map(|q| q as u8),
        cache_format: cache_format.as_deref().and_then(TargetFormat::from_name),
        cache_size: row
            .try_get::<Option<i64>, _>("cache_size")?
            .map(|s| s as u64),
        cached_at: row.try_get("cached_at")?,
        cache_width: row
            .try_get::<Option<i32>, _>("cache_width")?
            .map(|w| w as u32),
        cache_height: row
            .try_get::<Option<i32>, _>("cache_height")?
            .map(|h| h as u32),
    })
}

#[async_trait]
impl ImageStore for PostgresStore {
    async fn create(&self, image: ImageRecord) -> Result<ImageRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO images
                (id, collection_id, filename, relative_path, byte_size, width, height,
                 source_format, thumbnail_path, cache_path, cache_filename, cache_quality,
                 cache_format, cache_size, cached_at, cache_width, cache_height)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(image.id.as_uuid())
        .bind(image.collection_id.as_uuid())
        .bind(&image.filename)
        .bind(&image.relative_path)
        .bind(image.byte_size as i64)
        .bind(image.width as i32)
        .bind(image.height as i32)
        .bind(&image.source_format)
        .bind(&image.thumbnail_path)
        .bind(&image.cache_path)
        .bind(&image.cache_filename)
        .bind(image.cache_quality.map(|q| q as i16))
        .bind(image.cache_format.and_then(|f| f.canonical_extension()))
        .bind(image.cache_size.map(|s| s as i64))
        .bind(image.cached_at)
        .bind(image.cache_width.map(|w| w as i32))
        .bind(image.cache_height.map(|h| h as i32))
        .fetch_one(&self.pool)
        .await?;
        image_from_row(&row)
    }

    async fn update(&self, image: ImageRecord) -> Result<ImageRecord> {
        let row = sqlx::query(
            r#"
            UPDATE images SET
                filename = $2, relative_path = $3, byte_size = $4, width = $5, height = $6,
                source_format = $7, thumbnail_path = $8, cache_path = $9, cache_filename = $10,
                cache_quality = $11, cache_format = $12, cache_size = $13, cached_at = $14,
                cache_width = $15, cache_height = $16
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(image.id.as_uuid())
        .bind(&image.filename)
        .bind(&image.relative_path)
        .bind(image.byte_size as i64)
        .bind(image.width as i32)
        .bind(image.height as i32)
        .bind(&image.source_format)
        .bind(&image.thumbnail_path)
        .bind(&image.cache_path)
        .bind(&image.cache_filename)
        .bind(image.cache_quality.map(|q| q as i16))
        .bind(image.cache_format.and_then(|f| f.canonical_extension()))
        .bind(image.cache_size.map(|s| s as i64))
        .bind(image.cached_at)
        .bind(image.cache_width.map(|w| w as i32))
        .bind(image.cache_height.map(|h| h as i32))
        .fetch_one(&self.pool)
        .await?;
        image_from_row(&row)
    }

    async fn delete(&self, id: ImageId) -> Result<()> {
        sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_by_collection(
        &self,
        collection_id: CollectionId,
        page: u32,
        page_size: u32,
        sort: ImageSort,
    ) -> Result<Vec<ImageRecord>> {
        let order_by = match sort {
            ImageSort::NameAsc => "filename ASC",
            ImageSort::NameDesc => "filename DESC",
            ImageSort::CreatedAsc => "id ASC",
            ImageSort::CreatedDesc => "id DESC",
        };
        let offset = (page as i64) * (page_size as i64);
        let sql = format!(
            "SELECT * FROM images WHERE collection_id = $1 ORDER BY {order_by} LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(collection_id.as_uuid())
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(image_from_row).collect()
    }

    async fn count_by_collection(&self, collection_id: CollectionId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM images WHERE collection_id = $1")
            .bind(collection_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    async fn get_embedded(
        &self,
        collection_id: CollectionId,
        image_id: ImageId,
    ) -> Result<Option<ImageRecord>> {
        let row = sqlx::query("SELECT * FROM images WHERE id = $1 AND collection_id = $2")
            .bind(image_id.as_uuid())
            .bind(collection_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(image_from_row).transpose()
    }

    async fn get_by_id(&self, image_id: ImageId) -> Result<Option<ImageRecord>> {
        let row = sqlx::query("SELECT * FROM images WHERE id = $1")
            .bind(image_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(image_from_row).transpose()
    }
}

fn cache_folder_from_row(row: &sqlx::postgres::PgRow) -> Result<CacheFolder> {
    Ok(CacheFolder {
        id: CacheFolderId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        root_path: row.try_get("root_path")?,
        priority: row.try_get("priority")?,
        max_size_bytes: row
            .try_get::<Option<i64>, _>("max_size_bytes")?
            .map(|s| s as u64),
        current_size_bytes: row.try_get::<i64, _>("current_size_bytes")? as u64,
        current_file_count: row.try_get::<i64, _>("current_file_count")? as u64,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl CacheFolderStore for PostgresStore {
    async fn create(&self, folder: CacheFolder) -> Result<CacheFolder> {
        let row = sqlx::query(
            r#"
            INSERT INTO cache_folders
                (id, name, root_path, priority, max_size_bytes, current_size_bytes, current_file_count, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(folder.id.as_uuid())
        .bind(&folder.name)
        .bind(&folder.root_path)
        .bind(folder.priority)
        .bind(folder.max_size_bytes.map(|s| s as i64))
        .bind(folder.current_size_bytes as i64)
        .bind(folder.current_file_count as i64)
        .bind(folder.active)
        .fetch_one(&self.pool)
        .await?;
        cache_folder_from_row(&row)
    }

    async fn update(&self, folder: CacheFolder) -> Result<CacheFolder> {
        let row = sqlx::query(
            r#"
            UPDATE cache_folders SET
                name = $2, root_path = $3, priority = $4, max_size_bytes = $5,
                current_size_bytes = $6, current_file_count = $7, active = $8
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(folder.id.as_uuid())
        .bind(&folder.name)
        .bind(&folder.root_path)
        .bind(folder.priority)
        .bind(folder.max_size_bytes.map(|s| s as i64))
        .bind(folder.current_size_bytes as i64)
        .bind(folder.current_file_count as i64)
        .bind(folder.active)
        .fetch_one(&self.pool)
        .await?;
        cache_folder_from_row(&row)
    }

    async fn delete(&self, id: CacheFolderId) -> Result<()> {
        sqlx::query("DELETE FROM cache_folders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: CacheFolderId) -> Result<Option<CacheFolder>> {
        let row = sqlx::query("SELECT * FROM cache_folders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(cache_folder_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<CacheFolder>> {
        let rows = sqlx::query("SELECT * FROM cache_folders ORDER BY priority DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(cache_folder_from_row).collect()
    }

    /// A single atomic increment rather than read-modify-write, which is
    /// the natural way Postgres gives the "serialized per folder id"
    /// guarantee without an application-level lock.
    async fn adjust_usage(&self, id: CacheFolderId, delta_size: i64, delta_count: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cache_folders SET
                current_size_bytes = GREATEST(0, current_size_bytes + $2),
                current_file_count = GREATEST(0, current_file_count + $3)
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(delta_size)
        .bind(delta_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pick_for_collection(&self, collection_id: CollectionId) -> Result<Option<CacheFolder>> {
        let row = sqlx::query(
            r#"
            SELECT cf.* FROM cache_folders cf
            JOIN cache_folder_bindings b ON b.cache_folder_id = cf.id
            WHERE b.collection_id = $1
            "#,
        )
        .bind(collection_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(cache_folder_from_row).transpose()
    }

    async fn bind(&self, collection_id: CollectionId, folder_id: CacheFolderId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_folder_bindings (collection_id, cache_folder_id)
            VALUES ($1, $2)
            ON CONFLICT (collection_id) DO UPDATE SET cache_folder_id = EXCLUDED.cache_folder_id
            "#,
        )
        .bind(collection_id.as_uuid())
        .bind(folder_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_binding(&self, collection_id: CollectionId) -> Result<Option<CacheFolderBinding>> {
        let row = sqlx::query("SELECT * FROM cache_folder_bindings WHERE collection_id = $1")
            .bind(collection_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| CacheFolderBinding {
            collection_id,
            cache_folder_id: CacheFolderId::from_uuid(r.get("cache_folder_id")),
        }))
    }

    async fn count_bound_collections(&self, id: CacheFolderId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM cache_folder_bindings WHERE cache_folder_id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count as u64)
    }
}

fn job_status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::InProgress => "in_progress",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

fn job_status_from_str(s: &str) -> JobStatus {
    match s {
        "in_progress" => JobStatus::InProgress,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        _ => JobStatus::Pending,
    }
}

fn job_kind_to_str(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Discovery => "discovery",
        JobKind::CollectionScan => "collection_scan",
        JobKind::ThumbnailGeneration => "thumbnail_generation",
        JobKind::CacheGeneration => "cache_generation",
        JobKind::Composite => "composite",
        JobKind::BulkAdd => "bulk_add",
    }
}

fn job_kind_from_str(s: &str) -> JobKind {
    match s {
        "collection_scan" => JobKind::CollectionScan,
        "thumbnail_generation" => JobKind::ThumbnailGeneration,
        "cache_generation" => JobKind::CacheGeneration,
        "composite" => JobKind::Composite,
        "bulk_add" => JobKind::BulkAdd,
        _ => JobKind::Discovery,
    }
}

fn stage_status_to_str(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "pending",
        StageStatus::InProgress => "in_progress",
        StageStatus::Completed => "completed",
    }
}

fn stage_status_from_str(s: &str) -> StageStatus {
    match s {
        "in_progress" => StageStatus::InProgress,
        "completed" => StageStatus::Completed,
        _ => StageStatus::Pending,
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn create(&self, job: Job) -> Result<Job> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, status, collection_id, error_log, cancelled, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job_kind_to_str(job.kind))
        .bind(job_status_to_str(job.status))
        .bind(job.collection_id.map(|c| c.as_uuid()))
        .bind(serde_json::to_value(&job.error_log)?)
        .bind(job.cancelled)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await?;

        for stage in job.stages.values() {
            sqlx::query(
                r#"
                INSERT INTO job_stages (job_id, name, status, completed_items, total_items, message)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(job.id.as_uuid())
            .bind(&stage.name)
            .bind(stage_status_to_str(stage.status))
            .bind(stage.completed_items as i64)
            .bind(stage.total_items as i64)
            .bind(&stage.message)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let job_row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        let Some(job_row) = job_row else {
            return Ok(None);
        };

        let stage_rows = sqlx::query("SELECT * FROM job_stages WHERE job_id = $1")
            .bind(id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        let mut stages = std::collections::BTreeMap::new();
        for row in &stage_rows {
            let name: String = row.try_get("name")?;
            stages.insert(
                name.clone(),
                StageState {
                    name,
                    status: stage_status_from_str(row.try_get::<String, _>("status")?.as_str()),
                    completed_items: row.try_get::<i64, _>("completed_items")? as u64,
                    total_items: row.try_get::<i64, _>("total_items")? as u64,
                    message: row.try_get("message")?,
                },
            );
        }

        let error_log: serde_json::Value = job_row.try_get("error_log")?;
        let error_log: Vec<ItemError> = serde_json::from_value(error_log).unwrap_or_default();

        Ok(Some(Job {
            id,
            kind: job_kind_from_str(job_row.try_get::<String, _>("kind")?.as_str()),
            status: job_status_from_str(job_row.try_get::<String, _>("status")?.as_str()),
            stages,
            collection_id: job_row
                .try_get::<Option<uuid::Uuid>, _>("collection_id")?
                .map(CollectionId::from_uuid),
            error_log,
            cancelled: job_row.try_get("cancelled")?,
            created_at: job_row.try_get("created_at")?,
            updated_at: job_row.try_get("updated_at")?,
            completed_at: job_row.try_get("completed_at")?,
        }))
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        let completed_at: Option<DateTime<Utc>> = if status.is_terminal() {
            Some(Utc::now())
        } else {
            None
        };
        sqlx::query(
            r#"
            UPDATE jobs SET status = $2, updated_at = NOW(),
                completed_at = COALESCE($3, completed_at),
                cancelled = cancelled OR $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(job_status_to_str(status))
        .bind(completed_at)
        .bind(matches!(status, JobStatus::Cancelled))
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            r#"
            INSERT INTO job_stages (job_id, name, status, completed_items, total_items, message)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (job_id, name) DO UPDATE SET
                status = EXCLUDED.status,
                completed_items = EXCLUDED.completed_items,
                total_items = EXCLUDED.total_items,
                message = EXCLUDED.message
            "#,
        )
        .bind(id.as_uuid())
        .bind(stage_name)
        .bind(stage_status_to_str(status))
        .bind(completed as i64)
        .bind(total as i64)
        .bind(message)
        .execute(&self.pool)
        .await?;
        sqlx::query("UPDATE jobs SET updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, filter: JobListFilter) -> Result<Vec<Job>> {
        let status_str = filter.status.map(job_status_to_str);
        let rows = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(status_str)
        .bind(filter.since)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let id = JobId::from_uuid(row.try_get("id")?);
            if let Some(job) = self.get(id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn delete_older_than(&self, age: std::time::Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(age).unwrap_or(chrono::Duration::zero());
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled') AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn append_error(&self, id: JobId, error: ItemError) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                error_log = error_log || $2::jsonb,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(serde_json::to_value(vec![error])?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StatsStore for PostgresStore {
    async fn cache_distribution(&self) -> Result<Vec<CacheFolderUsage>> {
        let rows = sqlx::query(
            "SELECT id, current_size_bytes, current_file_count, max_size_bytes FROM cache_folders",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CacheFolderUsage {
                    folder_id: CacheFolderId::from_uuid(row.try_get("id")?),
                    current_size_bytes: row.try_get::<i64, _>("current_size_bytes")? as u64,
                    current_file_count: row.try_get::<i64, _>("current_file_count")? as u64,
                    max_size_bytes: row
                        .try_get::<Option<i64>, _>("max_size_bytes")?
                        .map(|s| s as u64),
                })
            })
            .collect()
    }

    async fn collection_activity(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(CollectionId, DateTime<Utc>)>> {
        let rows = sqlx::query("SELECT id, updated_at FROM collections WHERE updated_at >= $1")
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok((
                    CollectionId::from_uuid(row.try_get("id")?),
                    row.try_get("updated_at")?,
                ))
            })
            .collect()
    }
}
