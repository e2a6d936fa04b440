use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every tunable governing discovery, scanning, and derivative generation.
///
/// Loaded by `imagevault-server` from TOML + environment and handed to
/// `imagevault-core` as a single value; nothing in this crate reads
/// environment variables directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub max_concurrent_processes: usize,
    pub enable_parallel_cache_processing: bool,

    pub dangerous_path_prefixes: Vec<String>,

    pub supported_image_formats: Vec<String>,
    pub supported_archive_formats: Vec<String>,

    pub job_retention_hours: u64,

    pub thumbnail_w: u32,
    pub thumbnail_h: u32,
    pub thumbnail_quality: u8,

    pub cover_w: u32,
    pub cover_h: u32,
    pub cover_quality: u8,

    pub cache_quality_default: u8,
    pub cache_format_default: String,

    pub probe_timeout_ms: u64,
    pub max_input_pixels: u64,

    pub retry_max_attempts: u32,
    pub retry_backoff_ms: Vec<u64>,

    /// Default max recursion depth when `include_subfolders = true`.
    pub max_depth_with_subfolders: usize,
    /// Max recursion depth when `include_subfolders = false`.
    pub max_depth_without_subfolders: usize,

    /// How many transient network-drive errors within one job before
    /// concurrency is clamped to 1 for the job's remaining lifetime.
    pub network_error_clamp_threshold: u32,

    /// Monitor loop poll interval for composite job stage completion.
    pub monitor_poll_secs: u64,
    /// Consecutive no-progress polls before the monitor gives up on a job.
    pub monitor_stall_polls: u32,

    /// Retention sweep interval.
    pub retention_sweep_interval_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processes: 1,
            enable_parallel_cache_processing: false,

            dangerous_path_prefixes: default_dangerous_prefixes(),

            supported_image_formats: vec![
                "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "svg",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            supported_archive_formats: vec![
                "zip", "cbz", "cbr", "7z", "rar", "tar", "tar.gz", "tar.bz2",
            ]
            .into_iter()
            .map(String::from)
            .collect(),

            job_retention_hours: 2,

            thumbnail_w: 300,
            thumbnail_h: 300,
            thumbnail_quality: 80,

            cover_w: 800,
            cover_h: 450,
            cover_quality: 85,

            cache_quality_default: 85,
            cache_format_default: "jpeg".to_string(),

            probe_timeout_ms: 10_000,
            max_input_pixels: 268_000_000,

            retry_max_attempts: 5,
            retry_backoff_ms: vec![1_000, 2_000, 4_000],

            max_depth_with_subfolders: 10,
            max_depth_without_subfolders: 1,

            network_error_clamp_threshold: 5,

            monitor_poll_secs: 5,
            monitor_stall_polls: 12,

            retention_sweep_interval_secs: 2 * 3600,
        }
    }
}

impl CoreConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_hours * 3600)
    }

    pub fn retry_backoffs(&self) -> Vec<Duration> {
        self.retry_backoff_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    pub fn monitor_poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_poll_secs)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_secs)
    }

    pub fn max_depth(&self, include_subfolders: bool) -> usize {
        if include_subfolders {
            self.max_depth_with_subfolders
        } else {
            self.max_depth_without_subfolders
        }
    }
}

fn default_dangerous_prefixes() -> Vec<String> {
    vec![
        r"C:\Windows",
        r"C:\Program Files",
        r"C:\Program Files (x86)",
        r"C:\System Volume Information",
        "/proc",
        "/sys",
        "/dev",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
