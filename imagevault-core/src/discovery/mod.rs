//! Collection Discovery (C3): a pure function, with no metadata-store
//! dependency, that proposes collection candidates under a parent root.

use std::path::Path;

use crate::config::CoreConfig;
use crate::domain::{CandidateCollection, SourceKind};
use crate::error::{CoreError, Result};
use crate::fs::{is_dangerous, walk, EntryKind};

/// Sub-walk depth used to decide whether a directory "contains" images.
const IMAGE_CONTAINMENT_DEPTH: usize = 3;

pub fn find_collections(
    parent_root: &Path,
    include_subfolders: bool,
    prefix: &str,
    config: &CoreConfig,
) -> Result<Vec<CandidateCollection>> {
    if is_dangerous(parent_root, config) {
        return Err(CoreError::DangerousPath(parent_root.display().to_string()));
    }

    let max_depth = config.max_depth(include_subfolders);
    let entries = walk(parent_root, max_depth, config);

    let mut candidates = Vec::new();

    for entry in &entries {
        match entry.kind {
            EntryKind::Dir => {
                let absolute = &entry.absolute_path;
                if directory_has_images(absolute, config) {
                    let display_name = joined_display_name(prefix, &entry.relative_path);
                    candidates.push(CandidateCollection {
                        display_name,
                        path: absolute.display().to_string(),
                        kind: SourceKind::Folder,
                    });
                }
            }
            EntryKind::File => {
                let absolute = &entry.absolute_path;
                if let Some(kind) = archive_kind_of(absolute, config) {
                    let display_name = joined_display_name(prefix, &entry.relative_path);
                    candidates.push(CandidateCollection {
                        display_name,
                        path: absolute.display().to_string(),
                        kind,
                    });
                }
            }
        }
    }

    Ok(candidates)
}

fn directory_has_images(dir: &Path, config: &CoreConfig) -> bool {
    walk(dir, IMAGE_CONTAINMENT_DEPTH, config)
        .iter()
        .any(|entry| matches!(entry.kind, EntryKind::File) && is_supported_image(&entry.absolute_path, config))
}

fn is_supported_image(path: &Path, config: &CoreConfig) -> bool {
    extension_of(path)
        .map(|ext| config.supported_image_formats.iter().any(|s| s == &ext))
        .unwrap_or(false)
}

fn archive_kind_of(path: &Path, config: &CoreConfig) -> Option<SourceKind> {
    let ext = extension_of(path)?;
    if !config.supported_archive_formats.iter().any(|s| s == &ext) {
        return None;
    }
    SourceKind::from_archive_extension(&ext)
}

/// Lowercased extension, handling the compound `tar.gz`/`tar.bz2` suffixes.
fn extension_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    if name.ends_with(".tar.gz") {
        return Some("tar.gz".to_string());
    }
    if name.ends_with(".tar.bz2") {
        return Some("tar.bz2".to_string());
    }
    path.extension()?.to_str().map(|s| s.to_lowercase())
}

fn joined_display_name(prefix: &str, relative: &Path) -> String {
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" - ");
    format!("{prefix}{joined}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn empty_root_with_only_hidden_files_yields_no_candidates() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), b"ref: refs/heads/main").unwrap();

        let config = CoreConfig::default();
        let candidates = find_collections(dir.path(), true, "", &config).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn folder_with_images_is_a_candidate() {
        let dir = TempDir::new().unwrap();
        let album = dir.path().join("Album One");
        fs::create_dir(&album).unwrap();
        fs::write(album.join("cover.jpg"), b"x").unwrap();

        let config = CoreConfig::default();
        let candidates = find_collections(dir.path(), true, "", &config).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, SourceKind::Folder);
        assert_eq!(candidates[0].display_name, "Album One");
    }

    #[test]
    fn archive_file_is_a_candidate_with_kind_from_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Comic 1.cbz"), b"not-really-a-zip").unwrap();

        let config = CoreConfig::default();
        let candidates = find_collections(dir.path(), true, "", &config).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, SourceKind::Zip);
    }

    #[test]
    fn dangerous_parent_root_is_rejected() {
        let config = CoreConfig::default();
        let result = find_collections(Path::new("/proc/self"), true, "", &config);
        assert!(matches!(result, Err(CoreError::DangerousPath(_))));
    }

    #[test]
    fn nested_candidate_names_join_path_components_with_dash() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("Publisher").join("Series A");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("page.png"), b"x").unwrap();

        let config = CoreConfig::default();
        let candidates = find_collections(dir.path(), true, "", &config).unwrap();

        let series = candidates
            .iter()
            .find(|c| c.path.ends_with("Series A"))
            .expect("series candidate present");
        assert_eq!(series.display_name, "Publisher - Series A");
    }
}
