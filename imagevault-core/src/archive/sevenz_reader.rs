use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::{CoreError, Result};

use super::{ArchiveEntry, ArchiveReader};

/// `sevenz-rust` has no streaming single-entry API, so list/read both go
/// through a full decompress into a scratch directory, mirroring the
/// extraction-then-walk pattern used for 7z elsewhere in the wild.
pub struct SevenZReader;

impl ArchiveReader for SevenZReader {
    fn list_entries(&self, archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
        let (_scratch, root) = extract(archive_path)?;
        Ok(WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(&root).unwrap_or(e.path());
                let len = e.metadata().map(|m| m.len()).unwrap_or(0);
                ArchiveEntry {
                    name: rel.to_string_lossy().replace('\\', "/"),
                    byte_size: len,
                    is_directory: false,
                }
            })
            .collect())
    }

    fn read_entry(&self, archive_path: &Path, entry_name: &str) -> Result<Vec<u8>> {
        let (_scratch, root) = extract(archive_path)?;
        let target = root.join(entry_name);
        std::fs::read(&target).map_err(|_| {
            CoreError::UnsupportedOrMissingSource(format!(
                "{entry_name} not found in {}",
                archive_path.display()
            ))
        })
    }
}

fn extract(archive_path: &Path) -> Result<(TempDir, PathBuf)> {
    let scratch = TempDir::new().map_err(CoreError::Io)?;
    let root = scratch.path().to_path_buf();
    sevenz_rust::decompress_file(archive_path, &root).map_err(|e| {
        CoreError::UnsupportedOrMissingSource(format!(
            "{}: 7z extraction failed: {e}",
            archive_path.display()
        ))
    })?;
    Ok((scratch, root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_archive_is_unsupported_or_missing_source() {
        let reader = SevenZReader;
        let result = reader.list_entries(Path::new("/no/such/archive.7z"));
        assert!(matches!(result, Err(CoreError::UnsupportedOrMissingSource(_))));
    }
}
