//! # Backup Engine
//!
//! Drives the four repository operations: `new`, `update`, `check`, `restore`.
//!
//! ## Capture pipeline
//!
//! 1. Validate preconditions (fail fast, nothing written before this passes)
//! 2. Analyze the source tree: walk once, hash every file, sort by path
//! 3. Insert one manifest row per directory
//! 4. Ingest each file into the content store and insert its manifest row
//!
//! Deduplication is automatic and cross-version: content already present in
//! the store is recognized by hash and never copied again. `check` is the one
//! operation that aggregates problems into a report instead of aborting.

use crate::analyze::{Analysis, AnalysisSummary};
use crate::commands::{CheckCommand, NewCommand, RestoreCommand, UpdateCommand};
use crate::config::{DbConfig, FilestoreConfig, Overrides};
use crate::crypto::{self, Crypto};
use crate::db::ManifestDb;
use crate::error::{Result, ValidationError};
use crate::filestore::{self, Filestore};
use crate::models::{DirEntry, FileSystemObject, Version};
use crate::pathutil;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Outcome of a completed capture, for reporting.
pub struct CaptureReport {
    pub version: Version,
    pub summary: AnalysisSummary,
    pub new_blobs: u64,
    pub deduplicated_blobs: u64,
}

/// Creates a brand-new repository at `location` from `source`.
pub fn new(command: &NewCommand, overrides: &Overrides) -> Result<CaptureReport> {
    validate_version_name(&command.version)?;
    if !command.source.exists() {
        return Err(ValidationError::SourceMissing(command.source.clone()).into());
    }
    let db_config = overrides.db_config(&command.location);
    if has_versions(&db_config)? {
        return Err(ValidationError::RepositoryExists(command.location.clone()).into());
    }

    eprintln!(
        "  Creating new backup from {} into {}",
        command.source.display(),
        command.location.display(),
    );

    fs::create_dir_all(&command.location)?;
    let cipher = match command.password.as_deref() {
        Some(password) => Some(crypto::setup_repository_key(&command.location, password)?),
        None => None,
    };

    let filestore = Filestore::with_crypto(
        filestore_config(overrides, &command.location, command.zip),
        cipher,
    )?;
    let db = ManifestDb::new(db_config)?;
    let version = Version::new(&command.version);

    run_capture(&command.source, &version, &db, &filestore, None)
}

/// Captures another version into an existing repository.
pub fn update(command: &UpdateCommand, overrides: &Overrides) -> Result<CaptureReport> {
    validate_version_name(&command.version)?;
    if !command.source.exists() {
        return Err(ValidationError::SourceMissing(command.source.clone()).into());
    }
    if !command.location.exists() {
        return Err(ValidationError::RepositoryMissing(command.location.clone()).into());
    }

    let db = ManifestDb::new(overrides.db_config(&command.location))?;
    if db.maybe_get_version_by_name(&command.version).is_some() {
        return Err(ValidationError::VersionExists(command.version.clone()).into());
    }

    let cipher = open_crypto(&command.location, command.password.as_deref())?;
    let filestore = Filestore::with_crypto(
        filestore_config(overrides, &command.location, command.zip),
        cipher,
    )?;

    eprintln!(
        "  Updating backup at {} with new version {}",
        command.location.display(),
        command.version,
    );

    // Hashes from all prior versions let the analysis report how much of the
    // source is already stored.
    let mut stored_hashes = HashSet::new();
    for version in db.get_all_versions()? {
        for file in db.get_files_for_version(&version)? {
            stored_hashes.insert(file.sha1hash);
        }
    }

    let version = Version::new(&command.version);
    run_capture(&command.source, &version, &db, &filestore, Some(&stored_hashes))
}

/// Verifies that every manifested blob is still present in the content store.
///
/// Returns one message per missing blob; an empty list means the repository
/// is intact. Problems are reported, not raised.
pub fn check(command: &CheckCommand, overrides: &Overrides) -> Result<Vec<String>> {
    if !command.location.exists() {
        return Err(ValidationError::RepositoryMissing(command.location.clone()).into());
    }

    let db = ManifestDb::new(overrides.db_config(&command.location))?;
    let filestore = Filestore::new(filestore_config(overrides, &command.location, None))?;

    let versions = match &command.version {
        Some(name) => vec![db.get_version_by_name(name)?],
        None => db.get_all_versions()?,
    };

    let mut errors = Vec::new();
    for version in &versions {
        for file in db.get_files_for_version(version)? {
            if !filestore.exists(&file.stored_location) {
                errors.push(format!(
                    "Missing hash {} for {} in {}",
                    file.sha1hash, file.restore_path, version.name,
                ));
            }
        }
    }

    for error in &errors {
        eprintln!("  {} {error}", colored::Colorize::red("✗"));
    }
    if errors.is_empty() {
        eprintln!("  {} No errors found!", colored::Colorize::green("✓"));
    }

    Ok(errors)
}

/// Rebuilds a version's tree at `destination`. Returns the file count.
pub fn restore(command: &RestoreCommand, overrides: &Overrides) -> Result<u64> {
    if !command.location.exists() {
        return Err(ValidationError::RepositoryMissing(command.location.clone()).into());
    }
    if command.destination.exists() {
        let mut entries = fs::read_dir(&command.destination)?;
        if entries.next().is_some() {
            return Err(ValidationError::DestinationNotEmpty(command.destination.clone()).into());
        }
    }

    let db = ManifestDb::new(overrides.db_config(&command.location))?;
    let version = match &command.version_name {
        Some(name) => db.get_version_by_name(name)?,
        None => db
            .get_most_recent_version()?
            .ok_or(ValidationError::EmptyRepository)?,
    };

    let cipher = open_crypto(&command.location, command.password.as_deref())?;
    let filestore = Filestore::with_crypto(
        filestore_config(overrides, &command.location, None),
        cipher,
    )?;

    eprintln!(
        "  Restoring version {} to {}",
        version.name,
        command.destination.display(),
    );

    fs::create_dir_all(&command.destination)?;

    let total = db.get_files_for_version(&version)?.len() as u64;
    let pb = create_progress_bar(total, "restore");

    let mut restored = 0u64;
    for object in db.get_fs_objects_for_version(&version)? {
        match object? {
            FileSystemObject::Dir(dir) => {
                fs::create_dir_all(pathutil::relative_to_absolute(&command.destination, dir.path()))?;
            }
            FileSystemObject::File(file) => {
                pb.set_message(truncate_path(&file.restore_path, 40));
                filestore.restore(&file, &command.destination)?;
                restored += 1;
                pb.inc(1);
            }
        }
    }
    pb.finish_with_message("done");

    Ok(restored)
}

// ─── Capture pipeline ───────────────────────────────────────────────────────

fn run_capture(
    source: &Path,
    version: &Version,
    db: &ManifestDb,
    filestore: &Filestore,
    stored_hashes: Option<&HashSet<String>>,
) -> Result<CaptureReport> {
    let analysis = Analysis::scan(source, stored_hashes)?;
    let summary = analysis.summary();

    db.create_version(version)?;
    for dir in &analysis.dirs {
        db.insert_dir(version, &DirEntry::new(&dir.relative_path))?;
    }

    let pb = create_progress_bar(analysis.files.len() as u64, &version.name);
    let mut new_blobs = 0u64;
    let mut deduplicated_blobs = 0u64;

    for file in &analysis.files {
        pb.set_message(truncate_path(&file.relative_path, 40));

        let already_present = filestore.exists(&filestore::stored_location(&file.hash, false))
            || filestore.exists(&filestore::stored_location(&file.hash, true));

        let stored = filestore.put(&file.absolute_path, &file.relative_path, Some(&file.hash))?;
        db.insert_file(version, &stored)?;

        if already_present {
            deduplicated_blobs += 1;
        } else {
            new_blobs += 1;
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let report = CaptureReport {
        version: version.clone(),
        summary,
        new_blobs,
        deduplicated_blobs,
    };
    print_capture_summary(&report);
    Ok(report)
}

fn print_capture_summary(report: &CaptureReport) {
    eprintln!();
    eprintln!(
        "  {} Version: {}",
        colored::Colorize::green("✓"),
        colored::Colorize::bold(report.version.name.as_str()),
    );
    eprintln!(
        "    Analyzed: {} directories, {} files ({})",
        report.summary.dir_count,
        report.summary.file_count,
        format_size(report.summary.total_bytes),
    );
    eprintln!(
        "    Stored:   {} new blobs, {} deduplicated",
        report.new_blobs, report.deduplicated_blobs,
    );
    if report.summary.already_stored_count > 0 {
        eprintln!(
            "    Reused:   {} file(s) unchanged since prior versions",
            report.summary.already_stored_count,
        );
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn filestore_config(overrides: &Overrides, location: &Path, zip: Option<bool>) -> FilestoreConfig {
    let mut config = overrides.filestore_config(location);
    if let Some(zip_enabled) = zip {
        config.zip_enabled = zip_enabled;
    }
    config
}

/// Whether the repository already holds at least one manifest. Pure check,
/// creates nothing.
fn has_versions(db_config: &DbConfig) -> Result<bool> {
    let dir = db_config.manifest_dir();
    if !dir.exists() {
        return Ok(false);
    }
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file()
            && name.ends_with(db_config.csv_file_extension.as_str())
            && name.len() > db_config.csv_file_extension.len()
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Version names become manifest file names, so path separators and relative
/// components are rejected up front.
fn validate_version_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == "..";
    if bad {
        return Err(ValidationError::BadVersionName(name.to_string()).into());
    }
    Ok(())
}

fn open_crypto(location: &Path, password: Option<&str>) -> Result<Option<Crypto>> {
    match (crypto::is_encrypted(location), password) {
        (true, Some(password)) => Ok(Some(crypto::open_repository_key(location, password)?)),
        (true, None) => Err(ValidationError::PasswordRequired.into()),
        (false, Some(_)) => Err(ValidationError::PasswordUnexpected.into()),
        (false, None) => Ok(None),
    }
}

fn create_progress_bar(total: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "  {{spinner:.green}} {label} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} {{msg}}"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─"),
    );
    pb
}

fn truncate_path(path: &str, max_len: usize) -> String {
    if path.len() <= max_len {
        path.to_string()
    } else {
        format!("…{}", &path[path.len() - max_len + 1..])
    }
}

/// Formats a byte count as a human-readable size string.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PiB")
}
