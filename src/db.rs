//! # Manifest Database
//!
//! One append-only CSV file per version, named `<version><ext>` inside the
//! manifest directory (the repository root by default). Each row is either a
//! directory entry or a stored-file entry:
//!
//! ```text
//! "d","<normalized-dir-path>",""
//! "f","<restore-path>","<sha1>","<stored-location>","<True|False>"
//! ```
//!
//! Every field is double-quoted (embedded quotes doubled), comma-separated,
//! LF-terminated, UTF-8. Writers always emit the 5-column `f` form; readers
//! also accept the legacy 3-column form `"f","<path>","<sha1>"`, deriving the
//! stored location from the hash. Rows with an unknown tag are skipped; rows
//! that match neither schema are refused.
//!
//! Inserts open, append one line, and close; prior lines are never rewritten.
//! A version has a single writer during capture, while readers are safe at
//! any time.

use crate::config::DbConfig;
use crate::error::{ManifestError, Result, ValidationError};
use crate::filestore;
use crate::models::{DirEntry, FileSystemObject, StoredFile, Version};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// Per-version catalog of directory and file entries.
pub struct ManifestDb {
    config: DbConfig,
    manifest_dir: PathBuf,
}

impl ManifestDb {
    /// Opens (and if necessary creates) the manifest directory.
    pub fn new(config: DbConfig) -> Result<Self> {
        let manifest_dir = config.manifest_dir();
        fs::create_dir_all(&manifest_dir)?;
        Ok(Self {
            config,
            manifest_dir,
        })
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.manifest_dir
            .join(format!("{name}{}", self.config.csv_file_extension))
    }

    /// Every version in the repository, sorted ascending by name.
    ///
    /// The extension is stripped exactly once from the end of the file name;
    /// a version named `csv` keeps its name.
    pub fn get_all_versions(&self) -> Result<Vec<Version>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.manifest_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(base) = file_name.strip_suffix(self.config.csv_file_extension.as_str()) {
                if !base.is_empty() {
                    versions.push(Version::new(base));
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Presence test by name.
    pub fn maybe_get_version_by_name(&self, name: &str) -> Option<Version> {
        if self.manifest_path(name).exists() {
            Some(Version::new(name))
        } else {
            None
        }
    }

    /// Lookup by name, failing when the version does not exist.
    pub fn get_version_by_name(&self, name: &str) -> Result<Version> {
        self.maybe_get_version_by_name(name)
            .ok_or_else(|| {
                ValidationError::VersionMissing {
                    name: name.to_string(),
                    location: self.config.backup_dir.clone(),
                }
                .into()
            })
    }

    /// The version whose name sorts last, or `None` for an empty repository.
    /// Names embedding `YYYY-MM-DDTHHMMSS` timestamps therefore sort
    /// chronologically.
    pub fn get_most_recent_version(&self) -> Result<Option<Version>> {
        let mut versions = self.get_all_versions()?;
        Ok(versions.pop())
    }

    /// Lazily iterates a version's manifest in file order.
    pub fn get_fs_objects_for_version(&self, version: &Version) -> Result<FsObjectIter> {
        let path = self.manifest_path(&version.name);
        let file = File::open(&path)?;
        Ok(FsObjectIter {
            file: path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    /// Only the directory entries of a version.
    pub fn get_dirs_for_version(&self, version: &Version) -> Result<Vec<DirEntry>> {
        let mut dirs = Vec::new();
        for object in self.get_fs_objects_for_version(version)? {
            if let FileSystemObject::Dir(dir) = object? {
                dirs.push(dir);
            }
        }
        Ok(dirs)
    }

    /// Only the stored-file entries of a version.
    pub fn get_files_for_version(&self, version: &Version) -> Result<Vec<StoredFile>> {
        let mut files = Vec::new();
        for object in self.get_fs_objects_for_version(version)? {
            if let FileSystemObject::File(file) = object? {
                files.push(file);
            }
        }
        Ok(files)
    }

    /// Creates the (empty) manifest for a version, so that a capture of an
    /// empty source still registers its version.
    pub fn create_version(&self, version: &Version) -> Result<()> {
        self.append(&version.name, "")
    }

    /// Appends one directory row. The entry's path is already normalized.
    pub fn insert_dir(&self, version: &Version, dir: &DirEntry) -> Result<()> {
        let row = format!("{},{},{}\n", encode("d"), encode(dir.path()), encode(""));
        self.append(&version.name, &row)
    }

    /// Appends one stored-file row with all its fields.
    pub fn insert_file(&self, version: &Version, file: &StoredFile) -> Result<()> {
        let compressed = if file.is_compressed { "True" } else { "False" };
        let row = format!(
            "{},{},{},{},{}\n",
            encode("f"),
            encode(&file.restore_path),
            encode(&file.sha1hash),
            encode(&file.stored_location),
            encode(compressed),
        );
        self.append(&version.name, &row)
    }

    fn append(&self, name: &str, row: &str) -> Result<()> {
        let path = self.manifest_path(name);
        let mut writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ManifestError::AppendFailed(path.clone(), e))?;
        writer
            .write_all(row.as_bytes())
            .map_err(|e| ManifestError::AppendFailed(path.clone(), e))?;
        Ok(())
    }
}

/// Lazy reader over one version's manifest rows.
pub struct FsObjectIter {
    file: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
}

impl Iterator for FsObjectIter {
    type Item = Result<FileSystemObject>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;

            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }

            match decode_row(&line).and_then(row_to_object) {
                Ok(Some(object)) => return Some(Ok(object)),
                Ok(None) => continue,
                Err(message) => {
                    return Some(Err(ManifestError::CorruptedRow {
                        file: self.file.clone(),
                        line: self.line_no,
                        message,
                    }
                    .into()))
                }
            }
        }
    }
}

fn encode(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Splits one manifest line into its quoted fields.
fn decode_row(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        if chars.next() != Some('"') {
            return Err("field does not start with a quote".to_string());
        }

        let mut field = String::new();
        loop {
            match chars.next() {
                None => return Err("unterminated quoted field".to_string()),
                Some('"') => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        break;
                    }
                }
                Some(c) => field.push(c),
            }
        }
        fields.push(field);

        match chars.next() {
            None => return Ok(fields),
            Some(',') => continue,
            Some(c) => return Err(format!("unexpected character {c:?} after field")),
        }
    }
}

/// Maps a decoded row to a manifest entry. Unknown tags yield `None`.
fn row_to_object(fields: Vec<String>) -> std::result::Result<Option<FileSystemObject>, String> {
    match fields.first().map(String::as_str) {
        Some("d") => {
            if !(2..=3).contains(&fields.len()) {
                return Err(format!("directory row has {} fields", fields.len()));
            }
            Ok(Some(FileSystemObject::Dir(DirEntry::new(&fields[1]))))
        }
        Some("f") => match fields.len() {
            3 => {
                let hash = fields[2].clone();
                if hash.len() < 4 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(format!("malformed hash {hash:?}"));
                }
                Ok(Some(FileSystemObject::File(StoredFile {
                    restore_path: fields[1].clone(),
                    stored_location: filestore::stored_location(&hash, false),
                    sha1hash: hash,
                    is_compressed: false,
                })))
            }
            5 => {
                let is_compressed = match fields[4].as_str() {
                    "True" => true,
                    "False" => false,
                    other => return Err(format!("bad compression flag {other:?}")),
                };
                Ok(Some(FileSystemObject::File(StoredFile {
                    restore_path: fields[1].clone(),
                    sha1hash: fields[2].clone(),
                    stored_location: fields[3].clone(),
                    is_compressed,
                })))
            }
            n => Err(format!("file row has {n} fields")),
        },
        Some(_) => Ok(None),
        None => Err("empty row".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn db() -> (TempDir, ManifestDb) {
        let repo = tempfile::tempdir().unwrap();
        let db = ManifestDb::new(DbConfig::new(repo.path())).unwrap();
        (repo, db)
    }

    fn sample_file(path: &str, hash: &str, compressed: bool) -> StoredFile {
        StoredFile {
            restore_path: path.to_string(),
            sha1hash: hash.to_string(),
            stored_location: filestore::stored_location(hash, compressed),
            is_compressed: compressed,
        }
    }

    #[test]
    fn inserts_write_exact_rows() {
        let (repo, db) = db();
        let version = Version::new("v1");

        db.insert_dir(&version, &DirEntry::new("subdir/empty dir")).unwrap();
        db.insert_file(
            &version,
            &sample_file("LICENSE", "10e4b6f822c7493e1aea22d15e515b584b2db7a2", true),
        )
        .unwrap();

        let content = fs::read_to_string(repo.path().join("v1.csv")).unwrap();
        assert_eq!(
            content,
            "\"d\",\"subdir/empty dir\",\"\"\n\
             \"f\",\"LICENSE\",\"10e4b6f822c7493e1aea22d15e515b584b2db7a2\",\"1/0/e/4/10e4b6f822c7493e1aea22d15e515b584b2db7a2.zip\",\"True\"\n"
        );
    }

    #[test]
    fn rows_round_trip_in_file_order() {
        let (_repo, db) = db();
        let version = Version::new("v1");
        let file = sample_file("a.txt", "fef9161f9f9a492dba2b1357298f17897849fefc", false);

        db.insert_dir(&version, &DirEntry::new("subdir")).unwrap();
        db.insert_file(&version, &file).unwrap();

        let objects: Vec<_> = db
            .get_fs_objects_for_version(&version)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            objects,
            vec![
                FileSystemObject::Dir(DirEntry::new("subdir")),
                FileSystemObject::File(file),
            ]
        );
    }

    #[test]
    fn filtered_readers_partition_entries() {
        let (_repo, db) = db();
        let version = Version::new("v1");
        db.insert_dir(&version, &DirEntry::new("d1")).unwrap();
        db.insert_file(
            &version,
            &sample_file("f1", "07c8762861e8f1927708408702b1fd747032f050", false),
        )
        .unwrap();
        db.insert_dir(&version, &DirEntry::new("d2")).unwrap();

        assert_eq!(db.get_dirs_for_version(&version).unwrap().len(), 2);
        assert_eq!(db.get_files_for_version(&version).unwrap().len(), 1);
    }

    #[test]
    fn quotes_in_paths_survive_round_trip() {
        let (_repo, db) = db();
        let version = Version::new("v1");
        let file = sample_file(
            "odd \"name\", with comma.txt",
            "fef9161f9f9a492dba2b1357298f17897849fefc",
            false,
        );
        db.insert_file(&version, &file).unwrap();

        let files = db.get_files_for_version(&version).unwrap();
        assert_eq!(files, vec![file]);
    }

    #[test]
    fn legacy_three_column_rows_are_accepted() {
        let (repo, db) = db();
        fs::write(
            repo.path().join("old.csv"),
            "\"f\",\"a.txt\",\"fef9161f9f9a492dba2b1357298f17897849fefc\"\n",
        )
        .unwrap();

        let files = db.get_files_for_version(&Version::new("old")).unwrap();
        assert_eq!(
            files,
            vec![sample_file(
                "a.txt",
                "fef9161f9f9a492dba2b1357298f17897849fefc",
                false
            )]
        );
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let (repo, db) = db();
        fs::write(
            repo.path().join("v.csv"),
            "\"x\",\"whatever\"\n\"d\",\"kept\",\"\"\n",
        )
        .unwrap();

        let objects: Vec<_> = db
            .get_fs_objects_for_version(&Version::new("v"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(objects, vec![FileSystemObject::Dir(DirEntry::new("kept"))]);
    }

    #[test]
    fn rows_outside_the_schema_are_refused() {
        let (repo, db) = db();
        fs::write(repo.path().join("bad.csv"), "d,unquoted,\n").unwrap();
        let result: Result<Vec<_>> = db
            .get_fs_objects_for_version(&Version::new("bad"))
            .unwrap()
            .collect();
        assert!(result.is_err());

        fs::write(repo.path().join("bad2.csv"), "\"f\",\"p\",\"abcd\",\"loc\",\"yes\"\n").unwrap();
        let result: Result<Vec<_>> = db
            .get_fs_objects_for_version(&Version::new("bad2"))
            .unwrap()
            .collect();
        assert!(result.is_err());
    }

    #[test]
    fn version_listing_strips_extension_exactly() {
        let (repo, db) = db();
        fs::write(repo.path().join("2024-01-01T090000.csv"), "").unwrap();
        fs::write(repo.path().join("csv.csv"), "").unwrap();
        fs::write(repo.path().join("notes.txt"), "").unwrap();

        let versions = db.get_all_versions().unwrap();
        let names: Vec<_> = versions.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["2024-01-01T090000", "csv"]);
    }

    #[test]
    fn most_recent_version_sorts_by_name() {
        let (repo, db) = db();
        assert!(db.get_most_recent_version().unwrap().is_none());

        fs::write(repo.path().join("2023-05-01T120000.csv"), "").unwrap();
        fs::write(repo.path().join("2024-02-29T080000.csv"), "").unwrap();

        assert_eq!(
            db.get_most_recent_version().unwrap(),
            Some(Version::new("2024-02-29T080000"))
        );
    }

    #[test]
    fn create_version_registers_an_empty_manifest() {
        let (repo, db) = db();
        db.create_version(&Version::new("v1")).unwrap();

        assert_eq!(fs::read_to_string(repo.path().join("v1.csv")).unwrap(), "");
        assert!(db.maybe_get_version_by_name("v1").is_some());
        assert!(db
            .get_fs_objects_for_version(&Version::new("v1"))
            .unwrap()
            .next()
            .is_none());
    }

    #[test]
    fn lookup_of_missing_version_fails() {
        let (_repo, db) = db();
        assert!(db.maybe_get_version_by_name("nope").is_none());
        assert!(db.get_version_by_name("nope").is_err());
    }

    #[test]
    fn manifests_can_live_in_a_subdirectory() {
        let repo = tempfile::tempdir().unwrap();
        let mut config = DbConfig::new(repo.path());
        config.backup_db_dir = Some("db".to_string());
        let db = ManifestDb::new(config).unwrap();

        db.insert_dir(&Version::new("v1"), &DirEntry::new("d")).unwrap();
        assert!(repo.path().join("db/v1.csv").exists());
        assert_eq!(db.get_all_versions().unwrap(), vec![Version::new("v1")]);
    }
}
