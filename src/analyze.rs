//! # Source Tree Analyzer
//!
//! Walks a source tree exactly once, top-down, hashing every regular file on
//! the way and recording every subdirectory (the root itself excluded, empty
//! directories included). Both result lists are sorted by relative path so a
//! capture is deterministic regardless of directory iteration order.
//!
//! Only regular files and directories are captured; symlinks and special
//! files are ignored.

use crate::error::Result;
use crate::pathutil;
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// A subdirectory of the analyzed tree.
#[derive(Debug, Clone)]
pub struct AnalyzedDir {
    #[allow(dead_code)]
    pub absolute_path: PathBuf,
    pub relative_path: String,
}

/// A regular file of the analyzed tree, hashed during the walk.
#[derive(Debug, Clone)]
pub struct AnalyzedFile {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    pub hash: String,
    pub size: u64,
    /// Stringified timestamps, kept for listings and future UIs.
    #[allow(dead_code)]
    pub last_modified_at: String,
    #[allow(dead_code)]
    pub last_access_at: String,
    /// Whether the content is already present in the repository, when a set
    /// of stored hashes was supplied. Informational only.
    pub already_stored: bool,
}

/// Aggregate numbers for reporting after a scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisSummary {
    pub dir_count: usize,
    pub file_count: usize,
    pub total_bytes: u64,
    pub already_stored_count: usize,
}

/// The sorted outcome of one source-tree walk.
pub struct Analysis {
    pub dirs: Vec<AnalyzedDir>,
    pub files: Vec<AnalyzedFile>,
}

impl Analysis {
    /// Walks `source`, hashing files as they are encountered.
    pub fn scan(source: &Path, stored_hashes: Option<&HashSet<String>>) -> Result<Self> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();

        for entry in WalkDir::new(source) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.path() == source {
                continue;
            }

            let relative_path = pathutil::absolute_to_relative(source, entry.path());

            if entry.file_type().is_dir() {
                dirs.push(AnalyzedDir {
                    absolute_path: entry.path().to_path_buf(),
                    relative_path,
                });
            } else if entry.file_type().is_file() {
                let metadata = entry.metadata().map_err(std::io::Error::from)?;
                let hash = pathutil::compute_hash(entry.path())?;
                let already_stored = stored_hashes.is_some_and(|hashes| hashes.contains(&hash));

                files.push(AnalyzedFile {
                    absolute_path: entry.path().to_path_buf(),
                    relative_path,
                    hash,
                    size: metadata.len(),
                    last_modified_at: timestamp_string(metadata.modified()),
                    last_access_at: timestamp_string(metadata.accessed()),
                    already_stored,
                });
            }
        }

        dirs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        Ok(Self { dirs, files })
    }

    pub fn summary(&self) -> AnalysisSummary {
        AnalysisSummary {
            dir_count: self.dirs.len(),
            file_count: self.files.len(),
            total_bytes: self.files.iter().map(|f| f.size).sum(),
            already_stored_count: self.files.iter().filter(|f| f.already_stored).count(),
        }
    }
}

fn timestamp_string(time: std::io::Result<SystemTime>) -> String {
    time.ok()
        .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn fixture_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("subdir/empty dir")).unwrap();

        let mut f = File::create(dir.path().join("hello.txt")).unwrap();
        f.write_all(b"hello world").unwrap();
        File::create(dir.path().join("subdir/zzz.bin")).unwrap();
        File::create(dir.path().join("aaa.txt")).unwrap();
        dir
    }

    #[test]
    fn scan_collects_sorted_dirs_and_files() {
        let source = fixture_tree();
        let analysis = Analysis::scan(source.path(), None).unwrap();

        let dir_paths: Vec<_> = analysis.dirs.iter().map(|d| d.relative_path.as_str()).collect();
        assert_eq!(dir_paths, vec!["subdir", "subdir/empty dir"]);
        for dir in &analysis.dirs {
            assert_eq!(dir.absolute_path, source.path().join(&dir.relative_path));
        }

        let file_paths: Vec<_> = analysis
            .files
            .iter()
            .map(|f| f.relative_path.as_str())
            .collect();
        assert_eq!(file_paths, vec!["aaa.txt", "hello.txt", "subdir/zzz.bin"]);
    }

    #[test]
    fn scan_hashes_during_the_walk() {
        let source = fixture_tree();
        let analysis = Analysis::scan(source.path(), None).unwrap();

        let hello = analysis
            .files
            .iter()
            .find(|f| f.relative_path == "hello.txt")
            .unwrap();
        assert_eq!(hello.hash, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(hello.size, 11);
        assert_eq!(hello.absolute_path, source.path().join("hello.txt"));
        assert!(!hello.last_modified_at.is_empty());
        assert!(!hello.last_access_at.is_empty());
    }

    #[test]
    fn scan_flags_already_stored_hashes() {
        let source = fixture_tree();
        let mut stored = HashSet::new();
        stored.insert("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed".to_string());

        let analysis = Analysis::scan(source.path(), Some(&stored)).unwrap();
        let summary = analysis.summary();

        assert_eq!(summary.file_count, 3);
        assert_eq!(summary.dir_count, 2);
        assert_eq!(summary.already_stored_count, 1);
        assert_eq!(summary.total_bytes, 11);

        for file in &analysis.files {
            assert_eq!(file.already_stored, file.relative_path == "hello.txt");
        }
    }

    #[test]
    fn scan_of_empty_source_is_empty() {
        let source = tempfile::tempdir().unwrap();
        let analysis = Analysis::scan(source.path(), None).unwrap();
        assert!(analysis.dirs.is_empty());
        assert!(analysis.files.is_empty());
        assert_eq!(analysis.summary().total_bytes, 0);
    }
}
