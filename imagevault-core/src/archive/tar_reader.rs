use std::fs::File;
use std::io::Read;
use std::path::Path;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;

use crate::error::{CoreError, Result};

use super::{ArchiveEntry, ArchiveReader};

enum Compression {
    None,
    Gzip,
    Bzip2,
}

fn compression_for(archive_path: &Path) -> Compression {
    let name = archive_path.to_string_lossy().to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Compression::Gzip
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        Compression::Bzip2
    } else {
        Compression::None
    }
}

fn open_reader(archive_path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(archive_path).map_err(|_| {
        CoreError::UnsupportedOrMissingSource(format!("cannot open {}", archive_path.display()))
    })?;
    Ok(match compression_for(archive_path) {
        Compression::None => Box::new(file),
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Bzip2 => Box::new(BzDecoder::new(file)),
    })
}

pub struct TarReader;

impl ArchiveReader for TarReader {
    fn list_entries(&self, archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
        let reader = open_reader(archive_path)?;
        let mut archive = tar::Archive::new(reader);
        let entries = archive.entries().map_err(CoreError::Io)?;

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(CoreError::Io)?;
            let header = entry.header();
            let path = entry
                .path()
                .map_err(CoreError::Io)?
                .to_string_lossy()
                .replace('\\', "/");
            out.push(ArchiveEntry {
                name: path,
                byte_size: header.size().unwrap_or(0),
                is_directory: header.entry_type().is_dir(),
            });
        }
        Ok(out)
    }

    fn read_entry(&self, archive_path: &Path, entry_name: &str) -> Result<Vec<u8>> {
        let reader = open_reader(archive_path)?;
        let mut archive = tar::Archive::new(reader);
        let entries = archive.entries().map_err(CoreError::Io)?;

        for entry in entries {
            let mut entry = entry.map_err(CoreError::Io)?;
            let path = entry.path().map_err(CoreError::Io)?.to_string_lossy().replace('\\', "/");
            if path == entry_name {
                let mut buf = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut buf).map_err(CoreError::Io)?;
                return Ok(buf);
            }
        }
        Err(CoreError::UnsupportedOrMissingSource(format!(
            "{entry_name} not found in {}",
            archive_path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_is_chosen_by_extension() {
        assert!(matches!(
            compression_for(Path::new("book.tar")),
            Compression::None
        ));
        assert!(matches!(
            compression_for(Path::new("book.tar.gz")),
            Compression::Gzip
        ));
        assert!(matches!(
            compression_for(Path::new("book.tar.bz2")),
            Compression::Bzip2
        ));
    }

    #[test]
    fn missing_archive_is_unsupported_or_missing_source() {
        let reader = TarReader;
        let result = reader.list_entries(Path::new("/no/such/archive.tar"));
        assert!(matches!(result, Err(CoreError::UnsupportedOrMissingSource(_))));
    }
}
