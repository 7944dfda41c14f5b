//! # Configuration
//!
//! Tunables for the content store and the manifest database. Both configs are
//! plain values threaded through constructors; nothing here is mutable at
//! runtime. An optional TOML file can override the defaults for a run, and is
//! validated after parsing.

use crate::error::Result;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest file size (exclusive) that is worth compressing.
pub const ZIP_MIN_FILESIZE_IN_BYTES: u64 = 1024;

/// File name extension used for version manifests.
pub const CSV_FILE_EXTENSION: &str = ".csv";

/// Lowercase extensions of formats that are already compressed and therefore
/// skipped by the compressor. Matching is done against the lowercased suffix
/// of the file name, so `photo.JPG` is skipped too.
const ZIP_SKIP_EXTENSIONS: &[&str] = &[
    "mp3", "ogg", "wma", "7z", "arj", "deb", "pkg", "rar", "rpm", "gz", "zip", "jar", "jpg",
    "jpeg", "png", "pptx", "xlsx", "docx", "mp4", "avi", "mov", "rm", "mkv", "wmv", "tar.xz",
];

/// Settings for the content-addressed blob store.
#[derive(Debug, Clone)]
pub struct FilestoreConfig {
    /// Repository root directory.
    pub backup_dir: PathBuf,

    /// Name of the content area under the repository root.
    pub backup_data_dir: String,

    /// Whether eligible blobs are stored as zip archives.
    pub zip_enabled: bool,

    /// Files must be strictly larger than this to be compressed.
    pub zip_min_filesize_in_bytes: u64,

    /// Lowercase extensions never worth compressing.
    pub zip_skip_extensions: BTreeSet<String>,
}

impl FilestoreConfig {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            backup_data_dir: "data".to_string(),
            zip_enabled: false,
            zip_min_filesize_in_bytes: ZIP_MIN_FILESIZE_IN_BYTES,
            zip_skip_extensions: ZIP_SKIP_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Absolute path of the content area.
    pub fn data_root(&self) -> PathBuf {
        self.backup_dir.join(&self.backup_data_dir)
    }
}

/// Settings for the manifest database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Repository root directory.
    pub backup_dir: PathBuf,

    /// Optional subdirectory holding the manifests. `None` keeps them at the
    /// repository root, next to `data/`.
    pub backup_db_dir: Option<String>,

    /// Extension of manifest files, including the leading dot.
    pub csv_file_extension: String,
}

impl DbConfig {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            backup_db_dir: None,
            csv_file_extension: CSV_FILE_EXTENSION.to_string(),
        }
    }

    /// Absolute path of the directory holding the manifests.
    pub fn manifest_dir(&self) -> PathBuf {
        match &self.backup_db_dir {
            Some(sub) => self.backup_dir.join(sub),
            None => self.backup_dir.clone(),
        }
    }
}

// ─── Optional configuration file ────────────────────────────────────────────

/// Per-run overrides loaded from a TOML file via `--config`.
#[derive(Debug, Deserialize, Default)]
pub struct Overrides {
    #[serde(default)]
    pub filestore: FilestoreOverrides,

    #[serde(default)]
    pub db: DbOverrides,
}

#[derive(Debug, Deserialize, Default)]
pub struct FilestoreOverrides {
    pub data_dir: Option<String>,
    pub zip_enabled: Option<bool>,
    pub zip_min_filesize_in_bytes: Option<u64>,

    /// Extra extensions to skip, merged into the built-in set.
    #[serde(default)]
    pub zip_skip_extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DbOverrides {
    pub db_dir: Option<String>,
    pub csv_file_extension: Option<String>,
}

impl Overrides {
    /// Loads and validates overrides from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let overrides: Overrides = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        overrides.validate()?;
        Ok(overrides)
    }

    fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.filestore.data_dir {
            if dir.is_empty() || dir.contains('/') || dir.contains('\\') {
                return Err(anyhow::anyhow!("filestore.data_dir must be a plain directory name").into());
            }
        }
        if let Some(ext) = &self.db.csv_file_extension {
            if !ext.starts_with('.') || ext.len() < 2 {
                return Err(anyhow::anyhow!("db.csv_file_extension must start with a dot").into());
            }
        }
        Ok(())
    }

    /// Applies the overrides on top of a default filestore config.
    pub fn filestore_config(&self, backup_dir: &Path) -> FilestoreConfig {
        let mut config = FilestoreConfig::new(backup_dir);
        if let Some(dir) = &self.filestore.data_dir {
            config.backup_data_dir = dir.clone();
        }
        if let Some(enabled) = self.filestore.zip_enabled {
            config.zip_enabled = enabled;
        }
        if let Some(min) = self.filestore.zip_min_filesize_in_bytes {
            config.zip_min_filesize_in_bytes = min;
        }
        for ext in &self.filestore.zip_skip_extensions {
            config
                .zip_skip_extensions
                .insert(ext.trim_start_matches('.').to_lowercase());
        }
        config
    }

    /// Applies the overrides on top of a default db config.
    pub fn db_config(&self, backup_dir: &Path) -> DbConfig {
        let mut config = DbConfig::new(backup_dir);
        if let Some(dir) = &self.db.db_dir {
            config.backup_db_dir = Some(dir.clone());
        }
        if let Some(ext) = &self.db.csv_file_extension {
            config.csv_file_extension = ext.clone();
        }
        config
    }
}
