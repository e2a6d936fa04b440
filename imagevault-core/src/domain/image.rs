use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CollectionId, ImageId};

/// Output format for a derivative (thumbnail or cache variant).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TargetFormat {
    Jpeg,
    WebP,
    Png,
    /// Copy source bytes verbatim.
    Original,
}

impl TargetFormat {
    /// Canonical extension, or `None` for `Original` (the source extension applies instead).
    pub fn canonical_extension(&self) -> Option<&'static str> {
        match self {
            Self::Jpeg => Some("jpg"),
            Self::WebP => Some("webp"),
            Self::Png => Some("png"),
            Self::Original => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            "png" => Some(Self::Png),
            "original" => Some(Self::Original),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: ImageId,
    pub collection_id: CollectionId,
    pub filename: String,
    /// Relative path within the collection root, or the archive's virtual-path
    /// entry name for archive-backed collections.
    pub relative_path: String,
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
    pub source_format: String,

    pub thumbnail_path: Option<String>,

    pub cache_path: Option<String>,
    pub cache_filename: Option<String>,
    pub cache_quality: Option<u8>,
    pub cache_format: Option<TargetFormat>,
    pub cache_size: Option<u64>,
    pub cached_at: Option<DateTime<Utc>>,
    pub cache_width: Option<u32>,
    pub cache_height: Option<u32>,
}

impl ImageRecord {
    pub fn new(
        collection_id: CollectionId,
        filename: impl Into<String>,
        relative_path: impl Into<String>,
        byte_size: u64,
    ) -> Self {
        Self {
            id: ImageId::new(),
            collection_id,
            filename: filename.into(),
            relative_path: relative_path.into(),
            byte_size,
            width: 0,
            height: 0,
            source_format: String::new(),
            thumbnail_path: None,
            cache_path: None,
            cache_filename: None,
            cache_quality: None,
            cache_format: None,
            cache_size: None,
            cached_at: None,
            cache_width: None,
            cache_height: None,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached_at.is_some()
    }

    pub fn clear_cache_fields(&mut self) {
        self.cache_path = None;
        self.cache_filename = None;
        self.cache_quality = None;
        self.cache_format = None;
        self.cache_size = None;
        self.cached_at = None;
        self.cache_width = None;
        self.cache_height = None;
    }

    pub fn apply_cache_result(
        &mut self,
        path: String,
        filename: String,
        quality: u8,
        format: TargetFormat,
        size: u64,
        width: u32,
        height: u32,
    ) {
        self.cache_path = Some(path);
        self.cache_filename = Some(filename);
        self.cache_quality = Some(quality);
        self.cache_format = Some(format);
        self.cache_size = Some(size);
        self.cache_width = Some(width);
        self.cache_height = Some(height);
        self.cached_at = Some(Utc::now());
    }
}
