use serde::{Deserialize, Serialize};

use super::ids::{CacheFolderId, CollectionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheFolder {
    pub id: CacheFolderId,
    pub name: String,
    pub root_path: String,
    pub priority: i32,
    pub max_size_bytes: Option<u64>,
    pub current_size_bytes: u64,
    pub current_file_count: u64,
    pub active: bool,
}

impl CacheFolder {
    pub fn new(name: impl Into<String>, root_path: impl Into<String>, priority: i32) -> Self {
        Self {
            id: CacheFolderId::new(),
            name: name.into(),
            root_path: root_path.into(),
            priority,
            max_size_bytes: None,
            current_size_bytes: 0,
            current_file_count: 0,
            active: true,
        }
    }

    /// Would writing `projected_size` more bytes exceed this folder's quota?
    pub fn would_exceed_quota(&self, projected_write_size: u64) -> bool {
        match self.max_size_bytes {
            Some(max) => self.current_size_bytes.saturating_add(projected_write_size) > max,
            None => false,
        }
    }

    pub fn adjust_usage(&mut self, delta_size: i64, delta_count: i64) {
        self.current_size_bytes = adjust_u64(self.current_size_bytes, delta_size);
        self.current_file_count = adjust_u64(self.current_file_count, delta_count);
    }
}

fn adjust_u64(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

/// The persistent association of one collection to exactly one cache folder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheFolderBinding {
    pub collection_id: CollectionId,
    pub cache_folder_id: CacheFolderId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_check_respects_unset_max() {
        let folder = CacheFolder::new("F1", "/mnt/f1", 10);
        assert!(!folder.would_exceed_quota(u64::MAX / 2));
    }

    #[test]
    fn quota_check_flags_overflow() {
        let mut folder = CacheFolder::new("F1", "/mnt/f1", 10);
        folder.max_size_bytes = Some(100);
        folder.current_size_bytes = 90;
        assert!(folder.would_exceed_quota(20));
        assert!(!folder.would_exceed_quota(5));
    }

    #[test]
    fn adjust_usage_is_saturating() {
        let mut folder = CacheFolder::new("F1", "/mnt/f1", 10);
        folder.adjust_usage(-100, -5);
        assert_eq!(folder.current_size_bytes, 0);
        assert_eq!(folder.current_file_count, 0);
    }
}
