//! # Path Utilities and Content Hashing
//!
//! Manifest rows always carry *logical* paths: forward-slash separated,
//! relative, with no leading or trailing separator. [`normalize`] converts
//! whatever the OS hands us into that form, and the conversions between
//! absolute and repository-relative paths live here alongside the streaming
//! SHA-1 hasher that keys the content store.

use crate::error::{FilestoreError, Result};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Size of the read buffer for streaming hash computation (64 KiB).
///
/// Keeps memory bounded regardless of file size while amortizing syscall
/// overhead; kernels with readahead see diminishing returns beyond this.
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Normalizes a path string into logical manifest form.
///
/// Back-slashes become forward-slashes, leading and trailing separators are
/// stripped, and empty segments are collapsed. Idempotent.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins a relative path onto a root using OS path semantics.
pub fn relative_to_absolute(root: &Path, relative: &str) -> PathBuf {
    root.join(relative)
}

/// Returns the normalized suffix of `absolute` after `root`.
///
/// Tolerates a trailing separator on `root`. Falls back to the full path in
/// logical form when `absolute` is not inside `root`.
pub fn absolute_to_relative(root: &Path, absolute: &Path) -> String {
    let suffix = absolute.strip_prefix(root).unwrap_or(absolute);
    normalize(&suffix.to_string_lossy())
}

/// Computes the SHA-1 digest of a file's contents as 40 lowercase hex chars.
///
/// Streams the file through the hasher so arbitrarily large files never load
/// into memory at once.
pub fn compute_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| FilestoreError::HashFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];

    loop {
        let bytes_read = file.read(&mut buf).map_err(|e| FilestoreError::HashFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buf[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn normalize_strips_and_joins() {
        assert_eq!(normalize("/a/b/c/"), "a/b/c");
        assert_eq!(normalize("a\\b\\c"), "a/b/c");
        assert_eq!(normalize("a//b"), "a/b");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("///"), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["\\x\\y/", "/a//b/", "plain", "sub dir/file.txt"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn normalize_yields_no_separator_artifacts() {
        let n = normalize("\\leading\\and\\trailing\\");
        assert!(!n.contains('\\'));
        assert!(!n.starts_with('/'));
        assert!(!n.ends_with('/'));
        assert!(!n.contains("//"));
    }

    #[test]
    fn relative_round_trip() {
        let root = Path::new("/tmp/source");
        let abs = relative_to_absolute(root, "sub/file.txt");
        assert_eq!(absolute_to_relative(root, &abs), "sub/file.txt");
    }

    #[test]
    fn relative_tolerates_trailing_separator_on_root() {
        let abs = Path::new("/tmp/source/sub/file.txt");
        assert_eq!(
            absolute_to_relative(Path::new("/tmp/source/"), abs),
            "sub/file.txt"
        );
    }

    #[test]
    fn hash_of_empty_file_is_sha1_of_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        File::create(&path).unwrap();

        assert_eq!(
            compute_hash(&path).unwrap(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn hash_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);

        assert_eq!(
            compute_hash(&path).unwrap(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn hash_of_missing_file_fails() {
        assert!(compute_hash(Path::new("/nonexistent/nope")).is_err());
    }
}
