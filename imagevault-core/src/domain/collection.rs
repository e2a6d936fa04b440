use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::CollectionId;

/// How a collection's source is physically stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Folder,
    Zip,
    SevenZ,
    Rar,
    Tar,
}

impl SourceKind {
    /// Map a lowercase archive extension to its `SourceKind`.
    pub fn from_archive_extension(ext: &str) -> Option<Self> {
        match ext {
            "zip" | "cbz" => Some(Self::Zip),
            "rar" | "cbr" => Some(Self::Rar),
            "7z" => Some(Self::SevenZ),
            "tar" | "tar.gz" | "tar.bz2" => Some(Self::Tar),
            _ => None,
        }
    }

    pub fn is_archive(&self) -> bool {
        !matches!(self, Self::Folder)
    }
}

/// Embedded settings used to decide rescans.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CollectionSettings {
    pub total_images: u64,
    pub last_scanned: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub source_path: String,
    pub source_kind: SourceKind,
    pub library_id: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub settings: CollectionSettings,
}

impl Collection {
    pub fn new(name: impl Into<String>, source_path: impl Into<String>, source_kind: SourceKind) -> Self {
        let now = Utc::now();
        Self {
            id: CollectionId::new(),
            name: name.into(),
            source_path: source_path.into(),
            source_kind,
            library_id: None,
            active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            settings: CollectionSettings::default(),
        }
    }

    /// `(source_path, source_kind)` uniquely identifies a collection within
    /// one library scope.
    pub fn identity_key(&self) -> (String, SourceKind) {
        (self.source_path.clone(), self.source_kind)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn soft_delete(&mut self) {
        self.deleted_at = Some(Utc::now());
        self.active = false;
        self.updated_at = Utc::now();
    }
}

/// A candidate surfaced by discovery before it has been ingested
///. Not yet a `Collection` — discovery is pure w.r.t. the
/// metadata store.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandidateCollection {
    pub display_name: String,
    pub path: String,
    pub kind: SourceKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_extension_mapping_matches_spec() {
        assert_eq!(SourceKind::from_archive_extension("cbz"), Some(SourceKind::Zip));
        assert_eq!(SourceKind::from_archive_extension("cbr"), Some(SourceKind::Rar));
        assert_eq!(SourceKind::from_archive_extension("tar.gz"), Some(SourceKind::Tar));
        assert_eq!(SourceKind::from_archive_extension("txt"), None);
    }

    #[test]
    fn soft_delete_clears_active_flag() {
        let mut c = Collection::new("A", "/root/A", SourceKind::Folder);
        assert!(c.active);
        c.soft_delete();
        assert!(!c.active);
        assert!(c.is_deleted());
    }
}
