//! # Data Model
//!
//! The manifest records two kinds of entries: directories (structure only)
//! and stored files (a restore path bound to a content hash and its location
//! in the content store). Consumers pattern-match on [`FileSystemObject`].

use crate::pathutil;

/// Relative path of a blob inside the content area, e.g.
/// `f/e/f/9/fef9…fefc` or `…fefc.zip` for compressed blobs.
pub type StoredLocation = String;

/// A named capture of a source tree. The name doubles as the manifest file's
/// base name, so it must be file-system-safe.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub name: String,
}

impl Version {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A directory inside the captured tree, empty or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    path: String,
}

impl DirEntry {
    /// The path is normalized eagerly; every `DirEntry` holds logical form.
    pub fn new(path: &str) -> Self {
        Self {
            path: pathutil::normalize(path),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A file captured into the content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Normalized relative path where this file belongs after restore.
    pub restore_path: String,

    /// 40-char lowercase SHA-1 digest of the original contents.
    pub sha1hash: String,

    /// Where the blob lives inside the content area.
    pub stored_location: StoredLocation,

    /// Whether the blob is a zip archive of the original content.
    pub is_compressed: bool,
}

/// One manifest row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSystemObject {
    Dir(DirEntry),
    File(StoredFile),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_entry_normalizes_on_construction() {
        assert_eq!(DirEntry::new("\\sub\\empty dir\\").path(), "sub/empty dir");
    }

    #[test]
    fn versions_order_by_name() {
        let older = Version::new("2023-01-01T090000");
        let newer = Version::new("2024-06-30T120000");
        assert!(newer > older);
    }
}
