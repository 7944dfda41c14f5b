//! # Filestore
//!
//! Hash-sharded content-addressed blob store. Blobs are immutable files named
//! by the SHA-1 of their original contents, fanned out under
//! `data/h0/h1/h2/h3/` so no single directory grows unbounded. Eligible blobs
//! are stored as zip archives (`<hash>.zip`); everything else is copied
//! verbatim.
//!
//! Ingest is atomic: content is materialized under a temporary name inside the
//! data root and renamed into its final shard, so a crash mid-ingest never
//! leaves a half-written blob at a final location. Duplicate content is
//! detected up front and never re-copied.

use crate::config::FilestoreConfig;
use crate::crypto::Crypto;
use crate::error::{FilestoreError, Result};
use crate::models::{StoredFile, StoredLocation};
use crate::pathutil;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Suffix of compressed blobs.
pub const ZIPFILE_EXT: &str = ".zip";

/// Member name used when writing compressed blobs. Restore concatenates all
/// members in ascending name order, so multi-part archives written by other
/// tooling (`part0001`, `part0002`, …) read back correctly too.
const ZIP_MEMBER_NAME: &str = "part0001";

/// The four-level shard directory for a hash: `h0/h1/h2/h3`.
///
/// Expects a 40-char hex digest; anything shorter has no place in the store.
fn shard_dir(hash: &str) -> String {
    format!("{}/{}/{}/{}", &hash[..1], &hash[1..2], &hash[2..3], &hash[3..4])
}

/// The in-repo location of a blob, e.g. `f/e/f/9/fef9….zip`.
pub fn stored_location(hash: &str, is_compressed: bool) -> StoredLocation {
    let suffix = if is_compressed { ZIPFILE_EXT } else { "" };
    format!("{}/{hash}{suffix}", shard_dir(hash))
}

/// Content-addressed blob store rooted at `<repo>/data/`.
pub struct Filestore {
    config: FilestoreConfig,
    root_path: PathBuf,
    crypto: Option<Crypto>,
}

impl Filestore {
    /// Opens (and if necessary creates) the content area.
    pub fn new(config: FilestoreConfig) -> Result<Self> {
        Self::with_crypto(config, None)
    }

    /// Like [`Filestore::new`], but sealing every blob with the given cipher.
    pub fn with_crypto(config: FilestoreConfig, crypto: Option<Crypto>) -> Result<Self> {
        let root_path = config.data_root();
        fs::create_dir_all(&root_path)?;
        Ok(Self {
            config,
            root_path,
            crypto,
        })
    }

    /// Decides whether a file is worth compressing: compression must be
    /// enabled, the (lowercased) suffix must not name an already-compressed
    /// format, and the file must be strictly larger than the threshold.
    ///
    /// Pass `size` when it is already known to avoid a redundant stat.
    pub fn is_compression_eligible(&self, origin_file: &Path, size: Option<u64>) -> Result<bool> {
        if !self.config.zip_enabled || self.has_skip_extension(origin_file) {
            return Ok(false);
        }
        let size = match size {
            Some(size) => size,
            None => fs::metadata(origin_file)?.len(),
        };
        Ok(size > self.config.zip_min_filesize_in_bytes)
    }

    /// Tests both the last and the last two dot-segments, so `tar.xz` style
    /// compound suffixes are honoured.
    fn has_skip_extension(&self, origin_file: &Path) -> bool {
        let name = match origin_file.file_name() {
            Some(name) => name.to_string_lossy().to_lowercase(),
            None => return false,
        };
        let segments: Vec<&str> = name.split('.').collect();
        if segments.len() < 2 {
            return false;
        }
        let last = segments[segments.len() - 1];
        if self.config.zip_skip_extensions.contains(last) {
            return true;
        }
        segments.len() >= 3
            && self
                .config
                .zip_skip_extensions
                .contains(&segments[segments.len() - 2..].join("."))
    }

    /// Whether a blob is present at the given location.
    pub fn exists(&self, stored_location: &str) -> bool {
        self.root_path.join(stored_location).exists()
    }

    /// Ingests one file, returning its manifest row.
    ///
    /// Identical content is recognized by hash and never written twice. New
    /// content is materialized under a temporary name and published into its
    /// shard with an atomic rename; if another writer published the same hash
    /// in the meantime, the temp copy is simply discarded.
    pub fn put(
        &self,
        origin_file: &Path,
        restore_path: &str,
        precomputed_hash: Option<&str>,
    ) -> Result<StoredFile> {
        let restore_path = pathutil::normalize(restore_path);
        let hash = match precomputed_hash {
            Some(hash) => hash.to_string(),
            None => pathutil::compute_hash(origin_file)?,
        };
        let is_compressed = self.is_compression_eligible(origin_file, None)?;
        let location = stored_location(&hash, is_compressed);

        let stored = StoredFile {
            restore_path,
            sha1hash: hash.clone(),
            stored_location: location.clone(),
            is_compressed,
        };

        if self.exists(&location) {
            return Ok(stored);
        }

        let temp_path = self.root_path.join(temp_name(&hash));
        let published = self.materialize_and_publish(origin_file, &temp_path, &location, &hash, is_compressed);
        if published.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        published?;

        Ok(stored)
    }

    fn materialize_and_publish(
        &self,
        origin_file: &Path,
        temp_path: &Path,
        location: &str,
        hash: &str,
        is_compressed: bool,
    ) -> Result<()> {
        self.materialize(origin_file, temp_path, is_compressed)?;

        let final_path = self.root_path.join(location);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if final_path.exists() {
            // Lost the race to a concurrent writer of the same content.
            fs::remove_file(temp_path)?;
        } else {
            fs::rename(temp_path, &final_path).map_err(|e| FilestoreError::PublishFailed {
                hash: hash.to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Produces the exact bytes of the blob at a temporary path: zipped when
    /// compressed, sealed when the store is encrypted, plain copy otherwise.
    fn materialize(&self, origin_file: &Path, temp_path: &Path, is_compressed: bool) -> Result<()> {
        match (&self.crypto, is_compressed) {
            (None, false) => {
                fs::copy(origin_file, temp_path)?;
            }
            (None, true) => {
                let out = File::create(temp_path)?;
                let mut writer = ZipWriter::new(out);
                self.write_archive_member(&mut writer, origin_file)?;
                writer
                    .finish()
                    .map_err(|e| FilestoreError::ArchiveWrite {
                        path: origin_file.to_path_buf(),
                        source: e,
                    })?;
            }
            (Some(crypto), false) => {
                let plain = fs::read(origin_file)?;
                fs::write(temp_path, crypto.encrypt(&plain))?;
            }
            (Some(crypto), true) => {
                let mut cursor = io::Cursor::new(Vec::new());
                {
                    let mut writer = ZipWriter::new(&mut cursor);
                    self.write_archive_member(&mut writer, origin_file)?;
                    writer
                        .finish()
                        .map_err(|e| FilestoreError::ArchiveWrite {
                            path: origin_file.to_path_buf(),
                            source: e,
                        })?;
                }
                fs::write(temp_path, crypto.encrypt(&cursor.into_inner()))?;
            }
        }
        Ok(())
    }

    fn write_archive_member<W: io::Write + io::Seek>(
        &self,
        writer: &mut ZipWriter<W>,
        origin_file: &Path,
    ) -> Result<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file(ZIP_MEMBER_NAME, options)
            .map_err(|e| FilestoreError::ArchiveWrite {
                path: origin_file.to_path_buf(),
                source: e,
            })?;
        let mut input = File::open(origin_file)?;
        io::copy(&mut input, writer)?;
        Ok(())
    }

    /// Writes the original bytes of a stored file under `restore_to_path`,
    /// creating parent directories as needed.
    pub fn restore(&self, stored_file: &StoredFile, restore_to_path: &Path) -> Result<()> {
        let blob_path = self.root_path.join(&stored_file.stored_location);
        if !blob_path.exists() {
            return Err(FilestoreError::BlobMissing(stored_file.sha1hash.clone()).into());
        }

        let destination = pathutil::relative_to_absolute(restore_to_path, &stored_file.restore_path);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        match (&self.crypto, stored_file.is_compressed) {
            (None, false) => {
                fs::copy(&blob_path, &destination)?;
            }
            (None, true) => {
                let blob = File::open(&blob_path)?;
                unzip_concat(blob, &blob_path, &destination)?;
            }
            (Some(crypto), false) => {
                let sealed = fs::read(&blob_path)?;
                fs::write(&destination, crypto.decrypt(&sealed)?)?;
            }
            (Some(crypto), true) => {
                let sealed = fs::read(&blob_path)?;
                let plain = crypto.decrypt(&sealed)?;
                unzip_concat(io::Cursor::new(plain), &blob_path, &destination)?;
            }
        }
        Ok(())
    }

    pub fn data_root(&self) -> &Path {
        &self.root_path
    }
}

/// Unique temporary name inside the data root. Kept same-filesystem so the
/// publish rename stays atomic.
fn temp_name(hash: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{hash}.{suffix}.tmp")
}

/// Concatenates the members of a zip archive, in ascending name order, into
/// the destination file.
fn unzip_concat<R: io::Read + io::Seek>(reader: R, blob_path: &Path, destination: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(reader).map_err(|e| FilestoreError::ArchiveRead {
        path: blob_path.to_path_buf(),
        source: e,
    })?;

    let mut names: Vec<String> = archive.file_names().map(String::from).collect();
    names.sort();

    let mut out = File::create(destination)?;
    for name in names {
        let mut member = archive.by_name(&name).map_err(|e| FilestoreError::ArchiveRead {
            path: blob_path.to_path_buf(),
            source: e,
        })?;
        io::copy(&mut member, &mut out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    fn store(zip_enabled: bool) -> (TempDir, Filestore) {
        let repo = tempfile::tempdir().unwrap();
        let mut config = FilestoreConfig::new(repo.path());
        config.zip_enabled = zip_enabled;
        let filestore = Filestore::new(config).unwrap();
        (repo, filestore)
    }

    fn blob_count(root: &Path) -> usize {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[test]
    fn stored_location_shards_by_hash_prefix() {
        let hash = "fef9161f9f9a492dba2b1357298f17897849fefc";
        assert_eq!(
            stored_location(hash, false),
            "f/e/f/9/fef9161f9f9a492dba2b1357298f17897849fefc"
        );
        assert_eq!(
            stored_location(hash, true),
            "f/e/f/9/fef9161f9f9a492dba2b1357298f17897849fefc.zip"
        );
    }

    #[test]
    fn constructor_creates_data_root() {
        let (repo, filestore) = store(false);
        assert!(filestore.data_root().is_dir());
        assert_eq!(filestore.data_root(), repo.path().join("data"));
    }

    #[test]
    fn eligibility_requires_enabled_flag() {
        let (_repo, filestore) = store(false);
        let src = tempfile::tempdir().unwrap();
        let big = write_file(src.path(), "big.txt", &[b'x'; 5000]);
        assert!(!filestore.is_compression_eligible(&big, None).unwrap());
    }

    #[test]
    fn eligibility_skips_known_compressed_formats_case_insensitively() {
        let (_repo, filestore) = store(true);
        let src = tempfile::tempdir().unwrap();
        let jpg = write_file(src.path(), "photo.JPG", &[b'x'; 5000]);
        let tarball = write_file(src.path(), "dump.tar.xz", &[b'x'; 5000]);
        let text = write_file(src.path(), "notes.txt", &[b'x'; 5000]);

        assert!(!filestore.is_compression_eligible(&jpg, None).unwrap());
        assert!(!filestore.is_compression_eligible(&tarball, None).unwrap());
        assert!(filestore.is_compression_eligible(&text, None).unwrap());
    }

    #[test]
    fn eligibility_threshold_is_strict() {
        let (_repo, filestore) = store(true);
        let src = tempfile::tempdir().unwrap();
        let exactly = write_file(src.path(), "exactly.txt", &[b'x'; 1024]);
        let over = write_file(src.path(), "over.txt", &[b'x'; 1025]);

        assert!(!filestore.is_compression_eligible(&exactly, None).unwrap());
        assert!(filestore.is_compression_eligible(&over, None).unwrap());
    }

    #[test]
    fn put_publishes_raw_blob_at_sharded_location() {
        let (_repo, filestore) = store(false);
        let src = tempfile::tempdir().unwrap();
        let origin = write_file(src.path(), "a.txt", b"content A");

        let stored = filestore.put(&origin, "a.txt", None).unwrap();
        assert!(!stored.is_compressed);
        assert!(filestore.exists(&stored.stored_location));
        assert_eq!(
            fs::read(filestore.data_root().join(&stored.stored_location)).unwrap(),
            b"content A"
        );
    }

    #[test]
    fn put_is_idempotent_for_identical_content() {
        let (_repo, filestore) = store(false);
        let src = tempfile::tempdir().unwrap();
        let first = write_file(src.path(), "one.txt", b"same bytes");
        let second = write_file(src.path(), "two.txt", b"same bytes");

        let a = filestore.put(&first, "one.txt", None).unwrap();
        let b = filestore.put(&second, "two.txt", None).unwrap();

        assert_eq!(a.stored_location, b.stored_location);
        assert_eq!(a.sha1hash, b.sha1hash);
        assert_ne!(a.restore_path, b.restore_path);
        assert_eq!(blob_count(filestore.data_root()), 1);
    }

    #[test]
    fn put_reuses_precomputed_hash() {
        let (_repo, filestore) = store(false);
        let src = tempfile::tempdir().unwrap();
        let origin = write_file(src.path(), "a.txt", b"hello world");

        let stored = filestore
            .put(&origin, "a.txt", Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"))
            .unwrap();
        assert_eq!(stored.sha1hash, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert!(filestore.exists(&stored.stored_location));
    }

    #[test]
    fn put_normalizes_restore_path() {
        let (_repo, filestore) = store(false);
        let src = tempfile::tempdir().unwrap();
        let origin = write_file(src.path(), "a.txt", b"x");

        let stored = filestore.put(&origin, "sub\\dir\\a.txt", None).unwrap();
        assert_eq!(stored.restore_path, "sub/dir/a.txt");
    }

    #[test]
    fn put_leaves_no_temp_files_behind() {
        let (_repo, filestore) = store(true);
        let src = tempfile::tempdir().unwrap();
        let origin = write_file(src.path(), "big.txt", &[b'z'; 4096]);
        filestore.put(&origin, "big.txt", None).unwrap();

        let leftovers: Vec<_> = walkdir::WalkDir::new(filestore.data_root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn compressed_round_trip_reproduces_bytes() {
        let (_repo, filestore) = store(true);
        let src = tempfile::tempdir().unwrap();
        let contents: Vec<u8> = (0..4096u32).flat_map(|i| i.to_le_bytes()).collect();
        let origin = write_file(src.path(), "blob.bin", &contents);

        let stored = filestore.put(&origin, "blob.bin", None).unwrap();
        assert!(stored.is_compressed);
        assert!(stored.stored_location.ends_with(".zip"));

        let dest = tempfile::tempdir().unwrap();
        filestore.restore(&stored, dest.path()).unwrap();
        assert_eq!(fs::read(dest.path().join("blob.bin")).unwrap(), contents);
    }

    #[test]
    fn raw_round_trip_reproduces_bytes() {
        let (_repo, filestore) = store(false);
        let src = tempfile::tempdir().unwrap();
        let origin = write_file(src.path(), "nested/file.txt", b"plain bytes");

        let stored = filestore.put(&origin, "nested/file.txt", None).unwrap();
        let dest = tempfile::tempdir().unwrap();
        filestore.restore(&stored, dest.path()).unwrap();

        assert_eq!(
            fs::read(dest.path().join("nested/file.txt")).unwrap(),
            b"plain bytes"
        );
    }

    #[test]
    fn restore_of_missing_blob_fails() {
        let (_repo, filestore) = store(false);
        let ghost = StoredFile {
            restore_path: "ghost.txt".to_string(),
            sha1hash: "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            stored_location: stored_location("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", false),
            is_compressed: false,
        };
        let dest = tempfile::tempdir().unwrap();
        assert!(filestore.restore(&ghost, dest.path()).is_err());
    }

    #[test]
    fn encrypted_store_round_trips_and_obscures_content() {
        let repo = tempfile::tempdir().unwrap();
        let cipher = crypto::setup_repository_key(repo.path(), "pw").unwrap();
        let mut config = FilestoreConfig::new(repo.path());
        config.zip_enabled = true;
        let filestore = Filestore::with_crypto(config, Some(cipher)).unwrap();

        let src = tempfile::tempdir().unwrap();
        let small = write_file(src.path(), "small.txt", b"tiny");
        let large = write_file(src.path(), "large.txt", &[b'q'; 8192]);

        let stored_small = filestore.put(&small, "small.txt", None).unwrap();
        let stored_large = filestore.put(&large, "large.txt", None).unwrap();
        assert!(!stored_small.is_compressed);
        assert!(stored_large.is_compressed);

        // On-disk bytes are sealed, not the plaintext.
        let raw = fs::read(filestore.data_root().join(&stored_small.stored_location)).unwrap();
        assert_ne!(raw, b"tiny");

        let dest = tempfile::tempdir().unwrap();
        filestore.restore(&stored_small, dest.path()).unwrap();
        filestore.restore(&stored_large, dest.path()).unwrap();
        assert_eq!(fs::read(dest.path().join("small.txt")).unwrap(), b"tiny");
        assert_eq!(fs::read(dest.path().join("large.txt")).unwrap(), vec![b'q'; 8192]);
    }
}
