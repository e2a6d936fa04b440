pub mod cache_folder;
pub mod collection;
pub mod ids;
pub mod image;
pub mod job;

pub use cache_folder::{CacheFolder, CacheFolderBinding};
pub use collection::{CandidateCollection, Collection, CollectionSettings, SourceKind};
pub use ids::{CacheFolderId, CollectionId, ImageId, JobId};
pub use image::{ImageRecord, TargetFormat};
pub use job::{Job, JobKind, JobProgress, JobStatus, StageState, StageStatus};
