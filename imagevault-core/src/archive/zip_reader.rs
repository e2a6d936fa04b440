use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{CoreError, Result};

use super::{ArchiveEntry, ArchiveReader};

pub struct ZipReader;

impl ArchiveReader for ZipReader {
    fn list_entries(&self, archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
        let file = File::open(archive_path)
            .map_err(|_| unsupported_or_missing(archive_path))?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            CoreError::UnsupportedOrMissingSource(format!(
                "{}: invalid or corrupt zip: {e}",
                archive_path.display()
            ))
        })?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(|e| {
                CoreError::UnsupportedOrMissingSource(format!("entry {i} unreadable: {e}"))
            })?;
            entries.push(ArchiveEntry {
                name: entry.name().to_string(),
                byte_size: entry.size(),
                is_directory: entry.is_dir(),
            });
        }
        Ok(entries)
    }

    fn read_entry(&self, archive_path: &Path, entry_name: &str) -> Result<Vec<u8>> {
        let file = File::open(archive_path)
            .map_err(|_| unsupported_or_missing(archive_path))?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            CoreError::UnsupportedOrMissingSource(format!(
                "{}: invalid or corrupt zip: {e}",
                archive_path.display()
            ))
        })?;
        let mut entry = archive.by_name(entry_name).map_err(|_| {
            CoreError::UnsupportedOrMissingSource(format!(
                "{entry_name} not found in {}",
                archive_path.display()
            ))
        })?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf).map_err(CoreError::Io)?;
        Ok(buf)
    }
}

fn unsupported_or_missing(archive_path: &Path) -> CoreError {
    CoreError::UnsupportedOrMissingSource(format!("cannot open {}", archive_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn build_zip_with_one_entry(name: &str, data: &[u8]) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        writer
            .start_file(name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
        file
    }

    #[test]
    fn lists_and_reads_a_single_entry() {
        let archive = build_zip_with_one_entry("page-001.jpg", b"fake-jpeg-bytes");
        let reader = ZipReader;

        let entries = reader.list_entries(archive.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "page-001.jpg");

        let bytes = reader.read_entry(archive.path(), "page-001.jpg").unwrap();
        assert_eq!(bytes, b"fake-jpeg-bytes");
    }

    #[test]
    fn missing_entry_is_unsupported_or_missing_source() {
        let archive = build_zip_with_one_entry("page-001.jpg", b"data");
        let reader = ZipReader;
        let result = reader.read_entry(archive.path(), "nope.jpg");
        assert!(matches!(result, Err(CoreError::UnsupportedOrMissingSource(_))));
    }
}
