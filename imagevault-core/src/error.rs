use thiserror::Error;

/// Taxonomic error type for the whole core crate.
///
/// Each variant carries enough context to build a user-visible
/// `{item, message}` pair without ever surfacing a backtrace.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "postgres")]
    #[error("Metadata store error: {0}")]
    Store(#[from] sqlx::Error),

    #[cfg(feature = "redis-queue")]
    #[error("Queue transport error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("path is dangerous: {0}")]
    DangerousPath(String),

    #[error("path does not exist: {0}")]
    PathMissing(String),

    #[error("unsupported archive kind: {0}")]
    UnsupportedArchiveKind(String),

    #[error("archive source unsupported or missing: {0}")]
    UnsupportedOrMissingSource(String),

    #[error("probe timed out after {0:?}")]
    ProbeTimeout(std::time::Duration),

    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("input too large: {width}x{height} exceeds limit of {limit} pixels")]
    InputTooLarge {
        width: u32,
        height: u32,
        limit: u64,
    },

    #[error("write verification failed for {0}")]
    WriteVerificationFailed(String),

    #[error("transient network-drive error: {0}")]
    TransientNetworkDrive(String),

    #[error("no cache folder available for collection {0}")]
    NoCacheFolderAvailable(String),

    #[error("metadata store unavailable: {0}")]
    MetadataStoreUnavailable(String),

    #[error("message decode failed: {0}")]
    MessageDecodeFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// True for errors that are per-item and should accumulate in a job's
    /// `error_log` rather than fail the whole job.
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            CoreError::ProbeTimeout(_)
                | CoreError::ProbeFailed(_)
                | CoreError::InputTooLarge { .. }
                | CoreError::WriteVerificationFailed(_)
                | CoreError::TransientNetworkDrive(_)
                | CoreError::DangerousPath(_)
                | CoreError::PathMissing(_)
                | CoreError::UnsupportedArchiveKind(_)
        )
    }

    /// User-visible `{item, message}` shape with no stack traces.
    pub fn to_item_error(&self, item: impl Into<String>) -> ItemError {
        ItemError {
            item: item.into(),
            message: self.to_string(),
        }
    }
}

/// A single entry in a job's `error_log`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ItemError {
    pub item: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, CoreError>;
