use std::path::{Path, PathBuf};

use tracing::warn;

/// `true` if `path` exists; never propagates permission errors.
pub async fn path_exists_safe(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Directory listing that degrades to an empty `Vec` on any error rather
/// than failing the caller.
pub async fn read_dir_safe(path: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut rd = match tokio::fs::read_dir(path).await {
        Ok(rd) => rd,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "read_dir_safe failed, returning empty");
            return out;
        }
    };
    loop {
        match rd.next_entry().await {
            Ok(Some(entry)) => out.push(entry.path()),
            Ok(None) => break,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "read_dir_safe entry error, stopping early");
                break;
            }
        }
    }
    out
}

pub struct SafeStat {
    pub is_dir: bool,
    pub is_file: bool,
    pub len: u64,
}

/// Metadata lookup that returns `None` on any error (missing path, denied
/// permission) instead of throwing.
pub async fn stat_safe(path: &Path) -> Option<SafeStat> {
    match tokio::fs::metadata(path).await {
        Ok(md) => Some(SafeStat {
            is_dir: md.is_dir(),
            is_file: md.is_file(),
            len: md.len(),
        }),
        Err(_) => None,
    }
}

/// Removes a file or directory tree, returning `true` on success and
/// `false` (never an error) when the path is already gone or inaccessible.
pub async fn remove_safe(path: &Path) -> bool {
    let stat = match stat_safe(path).await {
        Some(stat) => stat,
        None => return true,
    };
    let result = if stat.is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "remove_safe failed");
            false
        }
    }
}

/// Creates `path` and all missing parents; idempotent.
pub async fn ensure_dir_safe(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// Joins `child` onto `base`, rejecting any component that would escape
/// `base` via `..`.
pub fn join_safe(base: &Path, child: &str) -> Option<PathBuf> {
    use std::path::Component;

    let mut joined = base.to_path_buf();
    for component in Path::new(child).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_safe_rejects_parent_escape() {
        let base = Path::new("/collections/root");
        assert!(join_safe(base, "../outside").is_none());
        assert!(join_safe(base, "sub/../../escape").is_none());
    }

    #[test]
    fn join_safe_normalizes_curdir() {
        let base = Path::new("/collections/root");
        let joined = join_safe(base, "./sub/file.jpg").unwrap();
        assert_eq!(joined, Path::new("/collections/root/sub/file.jpg"));
    }

    #[tokio::test]
    async fn stat_safe_returns_none_for_missing_path() {
        let result = stat_safe(Path::new("/definitely/not/a/real/path/xyz")).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn remove_safe_treats_missing_path_as_success() {
        assert!(remove_safe(Path::new("/definitely/not/a/real/path/xyz")).await);
    }
}
