//! Image Processor Abstraction (C4): probing, resizing, encoding, and
//! reading source bytes regardless of whether a collection is folder- or
//! archive-backed.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Collection, SourceKind, TargetFormat};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FitMode {
    /// Preserve aspect ratio, never upscale past the source size.
    Inside,
    /// Preserve aspect ratio, crop to exactly fill `w x h`, centered.
    Cover,
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
}

/// A reference to one image inside a collection: a plain relative path for
/// `Folder` collections, or an archive entry name otherwise.
#[derive(Debug, Clone)]
pub struct ImageRef<'a> {
    pub relative_path: &'a str,
}

#[async_trait]
pub trait ImageProcessor: Send + Sync {
    async fn probe(&self, bytes: &[u8], timeout: Duration, max_pixels: u64) -> Result<ProbeResult>;

    fn resize(&self, bytes: &[u8], fit: FitMode, max_w: u32, max_h: u32) -> Result<Vec<u8>>;

    fn encode(&self, bytes: &[u8], target_format: TargetFormat, quality: u8) -> Result<Vec<u8>>;

    /// Reads raw bytes for `image_ref` from `collection`'s backing store.
    async fn read_from_source(&self, collection: &Collection, image_ref: &ImageRef<'_>) -> Result<Vec<u8>>;
}

/// `image`-crate-backed default implementation.
#[cfg(feature = "images")]
pub struct DefaultImageProcessor;

#[cfg(feature = "images")]
#[async_trait]
impl ImageProcessor for DefaultImageProcessor {
    async fn probe(&self, bytes: &[u8], timeout: Duration, max_pixels: u64) -> Result<ProbeResult> {
        let owned = bytes.to_vec();
        let join = tokio::task::spawn_blocking(move || probe_blocking(&owned, max_pixels));
        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(join_err)) => Err(CoreError::ProbeFailed(format!("probe task panicked: {join_err}"))),
            Err(_) => Err(CoreError::ProbeTimeout(timeout)),
        }
    }

    fn resize(&self, bytes: &[u8], fit: FitMode, max_w: u32, max_h: u32) -> Result<Vec<u8>> {
        use image::imageops::FilterType;

        let img = image::load_from_memory(bytes)
            .map_err(|e| CoreError::ProbeFailed(format!("decode failed: {e}")))?;

        let resized = match fit {
            FitMode::Inside => {
                if img.width() <= max_w && img.height() <= max_h {
                    img
                } else {
                    img.resize(max_w, max_h, FilterType::Lanczos3)
                }
            }
            FitMode::Cover => img.resize_to_fill(max_w, max_h, FilterType::Lanczos3),
        };

        let mut out = Vec::new();
        resized
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .map_err(|e| CoreError::ProbeFailed(format!("re-encode after resize failed: {e}")))?;
        Ok(out)
    }

    fn encode(&self, bytes: &[u8], target_format: TargetFormat, quality: u8) -> Result<Vec<u8>> {
        if matches!(target_format, TargetFormat::Original) {
            return Ok(bytes.to_vec());
        }

        let img = image::load_from_memory(bytes)
            .map_err(|e| CoreError::ProbeFailed(format!("decode failed: {e}")))?;
        let rgb = img.to_rgb8();

        let mut out = Vec::new();
        match target_format {
            TargetFormat::Jpeg => {
                // Progressive, high-quality encoder options per spec.
                let mut encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
                encoder
                    .encode_image(&rgb)
                    .map_err(|e| CoreError::ProbeFailed(format!("jpeg encode failed: {e}")))?;
            }
            TargetFormat::WebP => {
                // The `image` crate's WebP encoder is lossless-only; quality
                // is accepted for interface symmetry but not honored bit-for-bit.
                rgb.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::WebP)
                    .map_err(|e| CoreError::ProbeFailed(format!("webp encode failed: {e}")))?;
            }
            TargetFormat::Png => {
                rgb.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
                    .map_err(|e| CoreError::ProbeFailed(format!("png encode failed: {e}")))?;
            }
            TargetFormat::Original => unreachable!("handled above"),
        }
        Ok(out)
    }

    async fn read_from_source(&self, collection: &Collection, image_ref: &ImageRef<'_>) -> Result<Vec<u8>> {
        match collection.source_kind {
            SourceKind::Folder => {
                let path = Path::new(&collection.source_path).join(image_ref.relative_path);
                tokio::fs::read(&path)
                    .await
                    .map_err(|_| CoreError::PathMissing(path.display().to_string()))
            }
            kind => {
                let archive_path = collection.source_path.clone();
                let entry_name = image_ref.relative_path.to_string();
                tokio::task::spawn_blocking(move || {
                    let reader = crate::archive::reader_for(kind)?;
                    reader.read_entry(Path::new(&archive_path), &entry_name)
                })
                .await
                .map_err(|e| CoreError::Internal(format!("archive read task panicked: {e}")))?
            }
        }
    }
}

#[cfg(feature = "images")]
fn probe_blocking(bytes: &[u8], max_pixels: u64) -> Result<ProbeResult> {
    use image::GenericImageView;

    let img = image::load_from_memory(bytes)
        .map_err(|e| CoreError::ProbeFailed(format!("decode failed: {e}")))?;
    let (width, height) = img.dimensions();

    if (width as u64) * (height as u64) > max_pixels {
        return Err(CoreError::InputTooLarge {
            width,
            height,
            limit: max_pixels,
        });
    }

    let format = sniff_format(bytes);
    Ok(ProbeResult {
        width,
        height,
        format,
    })
}

#[cfg(feature = "images")]
fn sniff_format(data: &[u8]) -> &'static str {
    if data.len() < 4 {
        return "unknown";
    }
    match &data[0..4] {
        [0xFF, 0xD8, 0xFF, _] => "jpeg",
        [0x89, 0x50, 0x4E, 0x47] => "png",
        [0x52, 0x49, 0x46, 0x46] => "webp",
        _ => "unknown",
    }
}

#[cfg(all(test, feature = "images"))]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn probe_reports_dimensions_and_format() {
        let processor = DefaultImageProcessor;
        let result = processor
            .probe(&tiny_png(), Duration::from_secs(10), 268_000_000)
            .await
            .unwrap();
        assert_eq!((result.width, result.height), (4, 4));
        assert_eq!(result.format, "png");
    }

    #[tokio::test]
    async fn probe_rejects_oversized_input() {
        let processor = DefaultImageProcessor;
        let result = processor
            .probe(&tiny_png(), Duration::from_secs(10), 4)
            .await;
        assert!(matches!(result, Err(CoreError::InputTooLarge { .. })));
    }

    #[test]
    fn resize_inside_never_upscales() {
        let processor = DefaultImageProcessor;
        let resized = processor
            .resize(&tiny_png(), FitMode::Inside, 1000, 1000)
            .unwrap();
        let img = image::load_from_memory(&resized).unwrap();
        use image::GenericImageView;
        assert_eq!(img.dimensions(), (4, 4));
    }

    #[test]
    fn resize_cover_fills_exact_target_dimensions() {
        let processor = DefaultImageProcessor;
        let resized = processor
            .resize(&tiny_png(), FitMode::Cover, 8, 2)
            .unwrap();
        let img = image::load_from_memory(&resized).unwrap();
        use image::GenericImageView;
        assert_eq!(img.dimensions(), (8, 2));
    }

    #[test]
    fn encode_original_passes_bytes_through_unchanged() {
        let processor = DefaultImageProcessor;
        let source = tiny_png();
        let encoded = processor.encode(&source, TargetFormat::Original, 90).unwrap();
        assert_eq!(encoded, source);
    }
}
