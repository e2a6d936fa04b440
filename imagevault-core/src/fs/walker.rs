use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use super::{is_dangerous, is_hidden};
use crate::config::CoreConfig;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EntryKind {
    Dir,
    File,
}

#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub absolute_path: PathBuf,
    pub relative_path: PathBuf,
    pub kind: EntryKind,
    pub name: String,
}

/// Bounded recursive traversal of `root`. Hidden entries and
/// dangerous subtrees are pruned before they are descended into, not merely
/// filtered out of the results afterward.
///
/// Finite and non-restartable: collects into a `Vec` rather than handing
/// back a lazy iterator tied to the `WalkDir` borrow, since callers
/// (discovery, scanning) consume the whole sequence anyway.
pub fn walk(root: &Path, max_depth: usize, config: &CoreConfig) -> Vec<WalkEntry> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| should_descend(entry, config));

    for item in walker {
        match item {
            Ok(entry) => {
                if entry.path() == root {
                    continue;
                }
                let Some(kind) = entry_kind(&entry) else {
                    continue;
                };
                let name = entry
                    .file_name()
                    .to_str()
                    .unwrap_or_default()
                    .to_string();
                if is_hidden(&name) {
                    continue;
                }
                let relative_path = entry
                    .path()
                    .strip_prefix(root)
                    .unwrap_or(entry.path())
                    .to_path_buf();
                entries.push(WalkEntry {
                    absolute_path: entry.path().to_path_buf(),
                    relative_path,
                    kind,
                    name,
                });
            }
            Err(err) => {
                // Permission-denied traversal of a subtree is a warning, not
                // a failure.
                warn!(error = %err, "error while walking directory tree");
            }
        }
    }

    entries
}

fn should_descend(entry: &DirEntry, config: &CoreConfig) -> bool {
    let name = entry.file_name().to_str().unwrap_or_default();
    if is_hidden(name) {
        return false;
    }
    !is_dangerous(entry.path(), config)
}

fn entry_kind(entry: &DirEntry) -> Option<EntryKind> {
    let ft = entry.file_type();
    if ft.is_dir() {
        Some(EntryKind::Dir)
    } else if ft.is_file() {
        Some(EntryKind::File)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn skips_hidden_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("visible.jpg"), b"x").unwrap();
        fs::write(dir.path().join(".hidden.jpg"), b"x").unwrap();
        fs::create_dir(dir.path().join("$RECYCLE.BIN")).unwrap();

        let config = CoreConfig::default();
        let entries = walk(dir.path(), 10, &config);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();

        assert!(names.contains(&"visible.jpg"));
        assert!(!names.contains(&".hidden.jpg"));
        assert!(!names.contains(&"$RECYCLE.BIN"));
    }

    #[test]
    fn prunes_dangerous_subtrees_without_descending() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        fs::create_dir(&cache_dir).unwrap();
        fs::write(cache_dir.join("leftover.jpg"), b"x").unwrap();
        fs::write(dir.path().join("keep.jpg"), b"x").unwrap();

        let config = CoreConfig::default();
        let entries = walk(dir.path(), 10, &config);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();

        assert!(names.contains(&"keep.jpg"));
        assert!(!names.contains(&"leftover.jpg"));
    }

    #[test]
    fn depth_cap_limits_recursion() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b").join("c");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("deep.jpg"), b"x").unwrap();
        fs::write(dir.path().join("a").join("shallow.jpg"), b"x").unwrap();

        let config = CoreConfig::default();
        let entries = walk(dir.path(), 1, &config);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();

        assert!(names.contains(&"a"));
        assert!(!names.contains(&"shallow.jpg"));
        assert!(!names.contains(&"deep.jpg"));
    }
}
