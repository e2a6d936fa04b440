mod filesystem;
pub mod safe_io;
pub mod walker;

pub use filesystem::{FileSystem, FsMetadata, InMemoryFs, ReadDirStream, RealFs};
pub use walker::{walk, EntryKind, WalkEntry};

use crate::config::CoreConfig;

/// Returns true when `path` matches one of `prefixes` (case-insensitive) or a
/// small fixed set of sensitive substrings.
pub fn is_dangerous(path: &std::path::Path, config: &CoreConfig) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    if config
        .dangerous_path_prefixes
        .iter()
        .any(|p| lower.starts_with(&p.to_lowercase()))
    {
        return true;
    }
    const SENSITIVE_SUBSTRINGS: &[&str] = &[
        "\\temp\\",
        "\\cache\\",
        "\\logs\\",
        "/temp/",
        "/cache/",
        "/logs/",
        "$recycle.bin",
        "system volume information",
    ];
    SENSITIVE_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

/// Hidden entries: names starting with `.` or `$`.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('$')
}
