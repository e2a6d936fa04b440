//! Derivative Generator (C6): per-image thumbnail/cache production,
//! skip/overwrite rules, atomic writes, and the collection cover-thumbnail
//! scorer.

pub mod cover;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::cache_placement::{classify_io_error, CachePlacementEngine, TransientKind};
use crate::config::CoreConfig;
use crate::domain::{Collection, CollectionId, ImageRecord, TargetFormat};
use crate::error::{CoreError, Result};
use crate::image_proc::{FitMode, ImageProcessor, ImageRef};
use crate::store::ImageStore;

pub use cover::{score_cover_candidate, CoverCandidate};

/// Per-collection generation parameters.
#[derive(Debug, Clone)]
pub struct DerivativeParams {
    pub target_format: TargetFormat,
    pub target_quality: u8,
    pub overwrite: bool,
    pub thumbnail_w: u32,
    pub thumbnail_h: u32,
}

/// Outcome of one image's derivative generation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum GenerationOutcome {
    Written,
    AlreadyCached,
}

/// Shared, job-scoped counter for the network-drive error clamp: after N
/// network-drive errors across a job (default 5), the job's per-job
/// concurrency is clamped to 1 for the remainder of its lifetime. One
/// instance is created per job and handed to every concurrent worker
/// processing that job's images.
#[derive(Debug)]
pub struct NetworkErrorTracker {
    count: AtomicU32,
    threshold: u32,
    clamped: AtomicBool,
}

impl NetworkErrorTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            threshold,
            clamped: AtomicBool::new(false),
        }
    }

    /// Records one network-drive fault; returns `true` the instant the
    /// clamp trips (so the caller can log the transition once).
    pub fn record_fault(&self) -> bool {
        let previous = self.count.fetch_add(1, Ordering::SeqCst);
        if previous + 1 >= self.threshold && !self.clamped.swap(true, Ordering::SeqCst) {
            return true;
        }
        false
    }

    pub fn is_clamped(&self) -> bool {
        self.clamped.load(Ordering::SeqCst)
    }
}

/// Builds the `<stem>[_q<quality>][_<format>].<ext>` cache filename
/// convention.
pub fn cache_filename(source_filename: &str, format: TargetFormat, quality: u8) -> String {
    let stem = Path::new(source_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(source_filename);
    let source_ext = Path::new(source_filename)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("bin");

    let mut name = stem.to_string();
    if !matches!(format, TargetFormat::Original) {
        name.push_str(&format!("_q{quality}"));
        if let Some(canon) = format.canonical_extension() {
            name.push('_');
            name.push_str(canon);
        }
    }
    let ext = format.canonical_extension().unwrap_or(source_ext);
    format!("{name}.{ext}")
}

/// Per-image thumbnail filename: `<image_stem>_thumb.jpg`.
pub fn thumbnail_filename(source_filename: &str) -> String {
    let stem = Path::new(source_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(source_filename);
    format!("{stem}_thumb.jpg")
}

pub struct DerivativeGenerator {
    processor: Arc<dyn ImageProcessor>,
    placement: Arc<CachePlacementEngine>,
    images: Arc<dyn ImageStore>,
    config: CoreConfig,
}

impl DerivativeGenerator {
    pub fn new(
        processor: Arc<dyn ImageProcessor>,
        placement: Arc<CachePlacementEngine>,
        images: Arc<dyn ImageStore>,
        config: CoreConfig,
    ) -> Self {
        Self {
            processor,
            placement,
            images,
            config,
        }
    }

    /// Per-image cache generation algorithm.
    pub async fn generate_cache(
        &self,
        collection: &Collection,
        image: &mut ImageRecord,
        params: &DerivativeParams,
        cancelled: &AtomicBool,
        network_errors: &NetworkErrorTracker,
    ) -> Result<GenerationOutcome> {
        if cancelled.load(Ordering::SeqCst) {
            return Err(CoreError::Cancelled(image.id.to_string()));
        }

        let folder = self.placement.place(collection.id, image.byte_size).await?;
        let dest_dir = CachePlacementEngine::collection_dir(&folder, collection.id);
        crate::fs::safe_io::ensure_dir_safe(&dest_dir)
            .await
            .map_err(CoreError::Io)?;

        let filename = cache_filename(&image.filename, params.target_format, params.target_quality);
        let dest_path = remap_if_too_long(&dest_dir, &filename);

        // Step 2: skip already-cached images unless overwrite is requested
        if !params.overwrite && image.is_cached() {
            if crate::fs::safe_io::path_exists_safe(&dest_path).await {
                return Ok(GenerationOutcome::AlreadyCached);
            }
        }

        let image_ref = ImageRef {
            relative_path: &image.relative_path,
        };
        let source_bytes = self.processor.read_from_source(collection, &image_ref).await?;

        let probe = self
            .processor
            .probe(&source_bytes, self.config.probe_timeout(), self.config.max_input_pixels)
            .await?;

        let encoded = if matches!(params.target_format, TargetFormat::Original) {
            source_bytes
        } else {
            // Cache is never an implicit resize; only re-encoded at the
            // source's own dimensions.
            self.processor
                .encode(&source_bytes, params.target_format, params.target_quality)?
        };

        let written_size = self
            .write_atomic_with_retry(&dest_path, &encoded, network_errors)
            .await?;

        image.apply_cache_result(
            dest_path.display().to_string(),
            filename,
            params.target_quality,
            params.target_format,
            written_size,
            probe.width,
            probe.height,
        );
        self.images.update(image.clone()).await?;

        self.placement
            .adjust_usage(folder.id, written_size as i64, 1)
            .await?;

        Ok(GenerationOutcome::Written)
    }

    /// Thumbnail generation: always `fit = Cover`, resizing to the target
    /// w x h.
    pub async fn generate_thumbnail(
        &self,
        collection: &Collection,
        image: &mut ImageRecord,
        w: u32,
        h: u32,
        network_errors: &NetworkErrorTracker,
    ) -> Result<GenerationOutcome> {
        let folder = self.placement.place(collection.id, image.byte_size).await?;
        let dest_dir = CachePlacementEngine::collection_dir(&folder, collection.id);
        crate::fs::safe_io::ensure_dir_safe(&dest_dir)
            .await
            .map_err(CoreError::Io)?;

        let filename = thumbnail_filename(&image.filename);
        let dest_path = remap_if_too_long(&dest_dir, &filename);

        let image_ref = ImageRef {
            relative_path: &image.relative_path,
        };
        let source_bytes = self.processor.read_from_source(collection, &image_ref).await?;
        self.processor
            .probe(&source_bytes, self.config.probe_timeout(), self.config.max_input_pixels)
            .await?;

        let resized = self.processor.resize(&source_bytes, FitMode::Cover, w, h)?;
        let encoded = self
            .processor
            .encode(&resized, TargetFormat::Jpeg, self.config.thumbnail_quality)?;

        let written_size = self
            .write_atomic_with_retry(&dest_path, &encoded, network_errors)
            .await?;

        image.thumbnail_path = Some(dest_path.display().to_string());
        self.images.update(image.clone()).await?;
        self.placement
            .adjust_usage(folder.id, written_size as i64, 1)
            .await?;

        Ok(GenerationOutcome::Written)
    }

    /// Collection cover-thumbnail generation: resizes the `pick_cover`-
    /// chosen image's source bytes to `cover_w x cover_h` (`FitMode::Cover`)
    /// at `cover_quality` and writes `collection_thumbnail.jpg` into the
    /// collection's cache directory. Idempotent — an already-materialized
    /// file is returned as-is rather than regenerated on every request.
    pub async fn generate_cover(
        &self,
        collection: &Collection,
        image: &ImageRecord,
        network_errors: &NetworkErrorTracker,
    ) -> Result<PathBuf> {
        let folder = self.placement.place(collection.id, image.byte_size).await?;
        let dest_dir = CachePlacementEngine::collection_dir(&folder, collection.id);
        crate::fs::safe_io::ensure_dir_safe(&dest_dir)
            .await
            .map_err(CoreError::Io)?;

        let dest_path = dest_dir.join("collection_thumbnail.jpg");

        if crate::fs::safe_io::path_exists_safe(&dest_path).await {
            return Ok(dest_path);
        }

        let image_ref = ImageRef {
            relative_path: &image.relative_path,
        };
        let source_bytes = self.processor.read_from_source(collection, &image_ref).await?;
        self.processor
            .probe(&source_bytes, self.config.probe_timeout(), self.config.max_input_pixels)
            .await?;

        let resized = self.processor.resize(
            &source_bytes,
            FitMode::Cover,
            self.config.cover_w,
            self.config.cover_h,
        )?;
        let encoded = self
            .processor
            .encode(&resized, TargetFormat::Jpeg, self.config.cover_quality)?;

        let written_size = self
            .write_atomic_with_retry(&dest_path, &encoded, network_errors)
            .await?;

        self.placement
            .adjust_usage(folder.id, written_size as i64, 1)
            .await?;

        Ok(dest_path)
    }

    /// Write to a sibling `*.tmp` then rename; verifies the final size
    /// matches the encoded buffer, retrying on
    /// network-drive faults per the §4.6 retry policy (up to 5 attempts,
    /// backoff 1s/2s/4s capped, write-probe on the 2nd attempt).
    async fn write_atomic_with_retry(
        &self,
        dest_path: &Path,
        bytes: &[u8],
        network_errors: &NetworkErrorTracker,
    ) -> Result<u64> {
        let backoffs = self.config.retry_backoffs();
        let max_attempts = self.config.retry_max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if attempt == 2 {
                if let Some(parent) = dest_path.parent() {
                    let _ = CachePlacementEngine::write_probe(parent).await;
                }
            }

            match self.write_atomic_once(dest_path, bytes).await {
                Ok(size) => return Ok(size),
                Err(CoreError::Io(io_err)) if attempt < max_attempts => {
                    let kind = classify_io_error(&io_err);
                    if matches!(kind, TransientKind::NetworkDrive) {
                        if network_errors.record_fault() {
                            warn!(
                                "network-drive error threshold reached, clamping job concurrency to 1"
                            );
                        }
                    }
                    let idx = (attempt - 1).min(backoffs.len().saturating_sub(1));
                    let delay = backoffs.get(idx).copied().unwrap_or(Duration::from_secs(4));
                    let capped = delay.min(Duration::from_secs(4));
                    warn!(path = %dest_path.display(), attempt, "write failed, retrying after backoff");
                    sleep(capped).await;
                }
                Err(other) => return Err(other),
            }
        }

        self.write_atomic_once(dest_path, bytes).await
    }

    async fn write_atomic_once(&self, dest_path: &Path, bytes: &[u8]) -> Result<u64> {
        let tmp_path = dest_path.with_extension(format!(
            "{}.tmp",
            dest_path.extension().and_then(|e| e.to_str()).unwrap_or("part")
        ));
        tokio::fs::write(&tmp_path, bytes).await.map_err(CoreError::Io)?;

        let written_len = tokio::fs::metadata(&tmp_path)
            .await
            .map_err(CoreError::Io)?
            .len();

        if written_len == 0 || written_len != bytes.len() as u64 {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(CoreError::WriteVerificationFailed(dest_path.display().to_string()));
        }

        tokio::fs::rename(&tmp_path, dest_path).await.map_err(CoreError::Io)?;
        Ok(written_len)
    }

    /// Whole-collection overwrite reset: delete every cache-marker file in
    /// the collection's derivative directory (excluding thumbnails and
    /// `collection_thumbnail.*`) and clear `cache_*` fields on every image
    /// record.
    pub async fn reset_for_overwrite(
        &self,
        collection_id: CollectionId,
        dest_dir: &Path,
        images: &mut [ImageRecord],
    ) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(dest_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with("_thumb.jpg") || name.starts_with("collection_thumbnail.") {
                continue;
            }
            let _ = tokio::fs::remove_file(entry.path()).await;
        }

        for image in images.iter_mut() {
            image.clear_cache_fields();
            self.images.update(image.clone()).await?;
        }

        info!(%collection_id, "cleared cache markers for collection overwrite");
        Ok(())
    }
}

/// Platform-safe path length limit before a short-path remap kicks in
///. 240 leaves headroom under Windows' historical
/// 260-character `MAX_PATH`.
const PLATFORM_SAFE_PATH_LIMIT: usize = 240;

fn remap_if_too_long(dest_dir: &Path, filename: &str) -> PathBuf {
    let candidate = dest_dir.join(filename);
    if candidate.as_os_str().len() <= PLATFORM_SAFE_PATH_LIMIT {
        return candidate;
    }

    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    let digest = hex_prefix(&hasher.finalize(), 16);
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    dest_dir.join(format!("{digest}.{ext}"))
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(chars)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_filename_uses_original_extension_for_original_format() {
        let name = cache_filename("photo.png", TargetFormat::Original, 90);
        assert_eq!(name, "photo.png");
    }

    #[test]
    fn cache_filename_embeds_quality_and_format_marker() {
        let name = cache_filename("photo.png", TargetFormat::Jpeg, 85);
        assert_eq!(name, "photo_q85_jpg.jpg");
    }

    #[test]
    fn thumbnail_filename_appends_thumb_suffix() {
        assert_eq!(thumbnail_filename("cover.jpg"), "cover_thumb.jpg");
    }

    #[test]
    fn network_error_tracker_trips_clamp_once_at_threshold() {
        let tracker = NetworkErrorTracker::new(5);
        for _ in 0..4 {
            assert!(!tracker.record_fault());
        }
        assert!(tracker.record_fault());
        assert!(tracker.is_clamped());
        // Further faults don't re-trip (the clamp is sticky for the job).
        assert!(!tracker.record_fault());
    }

    #[test]
    fn remap_if_too_long_preserves_short_paths() {
        let dir = Path::new("/cache/abc");
        let path = remap_if_too_long(dir, "short.jpg");
        assert_eq!(path, dir.join("short.jpg"));
    }
}
