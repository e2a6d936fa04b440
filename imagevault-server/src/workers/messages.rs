//! Stage-specific payload shapes carried in `WorkMessage::parameters`
//!. The queue transport treats
//! `parameters` as an opaque `serde_json::Value`; these types give each
//! stage handler a typed view of it.

use imagevault_core::domain::TargetFormat;
use serde::{Deserialize, Serialize};

/// Parameters for the `discover` stage (`Discovery`/`BulkAdd` entry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverParams {
    pub parent_root: String,
    #[serde(default)]
    pub include_subfolders: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub library_id: Option<String>,
    /// Whether a successful discovery should chain into scan/thumbnail/cache
    /// for every newly ingested collection (`BulkAdd`) or stop at ingestion
    /// (`Discovery`).
    #[serde(default)]
    pub chain: bool,
}

/// Parameters for the `scan` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanParams {
    #[serde(default)]
    pub force_rescan: bool,
    /// Whether a successful scan should chain into `thumbnail` then `cache`.
    #[serde(default)]
    pub chain: bool,
}

/// Parameters for the `thumbnail` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailParams {
    pub w: u32,
    pub h: u32,
    #[serde(default)]
    pub force_regen: bool,
    #[serde(default)]
    pub chain: bool,
}

/// Parameters for the `cache` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheParams {
    pub target_format: TargetFormat,
    pub target_quality: u8,
    #[serde(default)]
    pub overwrite: bool,
}

pub fn decode<T: serde::de::DeserializeOwned>(value: &serde_json::Value) -> imagevault_core::Result<T> {
    serde_json::from_value(value.clone()).map_err(imagevault_core::CoreError::Serialization)
}
