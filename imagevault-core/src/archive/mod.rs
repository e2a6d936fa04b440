//! Archive Reader Abstraction (C2): lazy listing and single-entry reads
//! across the source kinds a collection can be stored as.

#[cfg(feature = "archives")]
mod rar_reader;
#[cfg(feature = "archives")]
mod sevenz_reader;
#[cfg(feature = "archives")]
mod tar_reader;
#[cfg(feature = "archives")]
mod zip_reader;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::domain::SourceKind;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ArchiveEntry {
    pub name: String,
    pub byte_size: u64,
    pub is_directory: bool,
}

/// Unified shape for identifying an image nested inside an archive:
/// `"<archive_path>#<entry_name>"`. The first `#` is the separator; archive
/// paths never contain `#` on the platforms this runs on.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct VirtualPath {
    pub archive_path: String,
    pub entry_name: String,
}

impl VirtualPath {
    pub fn new(archive_path: impl Into<String>, entry_name: impl Into<String>) -> Self {
        Self {
            archive_path: archive_path.into(),
            entry_name: entry_name.into(),
        }
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.archive_path, self.entry_name)
    }
}

impl FromStr for VirtualPath {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('#') {
            Some((archive_path, entry_name)) => Ok(Self::new(archive_path, entry_name)),
            None => Err(CoreError::InvalidInput(format!(
                "not a virtual path (missing '#'): {s}"
            ))),
        }
    }
}

/// Per-kind adapter for listing and reading archive members.
pub trait ArchiveReader: Send + Sync {
    fn list_entries(&self, archive_path: &Path) -> Result<Vec<ArchiveEntry>>;
    fn read_entry(&self, archive_path: &Path, entry_name: &str) -> Result<Vec<u8>>;
}

/// Resolves the reader for a `SourceKind`. Missing-feature kinds fall back
/// to `UnsupportedArchiveKind` at call time rather than at compile time, so
/// a server built without the `archives` feature still links.
pub fn reader_for(kind: SourceKind) -> Result<Box<dyn ArchiveReader>> {
    #[cfg(feature = "archives")]
    {
        match kind {
            SourceKind::Zip => Ok(Box::new(zip_reader::ZipReader)),
            SourceKind::SevenZ => Ok(Box::new(sevenz_reader::SevenZReader)),
            SourceKind::Rar => Ok(Box::new(rar_reader::RarReader)),
            SourceKind::Tar => Ok(Box::new(tar_reader::TarReader)),
            SourceKind::Folder => Err(CoreError::UnsupportedArchiveKind(
                "Folder is not an archive kind".to_string(),
            )),
        }
    }
    #[cfg(not(feature = "archives"))]
    {
        let _ = kind;
        Err(CoreError::UnsupportedArchiveKind(
            "archives feature is disabled".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_path_round_trips() {
        let vp = VirtualPath::new("/lib/comic.cbz", "page-001.jpg");
        let s = vp.to_string();
        assert_eq!(s, "/lib/comic.cbz#page-001.jpg");
        let parsed: VirtualPath = s.parse().unwrap();
        assert_eq!(parsed, vp);
    }

    #[test]
    fn virtual_path_splits_on_first_hash_only() {
        let parsed: VirtualPath = "/lib/a#b/c#d.jpg".parse().unwrap();
        assert_eq!(parsed.archive_path, "/lib/a");
        assert_eq!(parsed.entry_name, "b/c#d.jpg");
    }

    #[test]
    fn virtual_path_rejects_missing_separator() {
        let result: Result<VirtualPath> = "no-hash-here".parse();
        assert!(result.is_err());
    }
}
