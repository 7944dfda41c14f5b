//! # Error Types
//!
//! Defines a structured error hierarchy for the backup engine using `thiserror`.
//! Precondition violations surface as [`ValidationError`] before any work is
//! performed; I/O failures during execution propagate unmodified. Only `check`
//! aggregates errors instead of aborting, and it does so as plain strings.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type encompassing all failure modes in the backup system.
#[derive(Error, Debug)]
pub enum PackratError {
    #[error("invalid command: {0}")]
    Validation(#[from] ValidationError),

    #[error("filestore error: {0}")]
    Filestore(#[from] FilestoreError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Precondition violations raised before a command performs any work.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("source path {0} does not exist")]
    SourceMissing(PathBuf),

    #[error("destination path {0} already contains a backup repository")]
    RepositoryExists(PathBuf),

    #[error("backup repository {0} does not exist")]
    RepositoryMissing(PathBuf),

    #[error("there is already a backup versioned with the name {0}")]
    VersionExists(String),

    #[error("backup version named {name} does not exist at {location}")]
    VersionMissing { name: String, location: PathBuf },

    #[error("restore destination {0} already exists and is not empty")]
    DestinationNotEmpty(PathBuf),

    #[error("version name {0:?} is not usable as a file name")]
    BadVersionName(String),

    #[error("repository is encrypted; a password is required")]
    PasswordRequired,

    #[error("repository is not encrypted but a password was given")]
    PasswordUnexpected,

    #[error("repository has no versions to restore")]
    EmptyRepository,
}

/// Failures inside the content-addressed blob store.
#[derive(Error, Debug)]
pub enum FilestoreError {
    #[error("blob missing from content store: {0}")]
    BlobMissing(String),

    #[error("failed to hash {path}: {source}")]
    HashFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build archive for {path}: {source}")]
    ArchiveWrite {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to read archive {path}: {source}")]
    ArchiveRead {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to publish blob {hash}: {source}")]
    PublishFailed {
        hash: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while reading or writing version manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("corrupted manifest row at {file}:{line}: {message}")]
    CorruptedRow {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("failed to append to manifest {0}")]
    AppendFailed(PathBuf, #[source] std::io::Error),
}

/// Cryptographic collaborator errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("unsupported key length {0} (expected 16 or 32 bytes)")]
    UnsupportedKeyLength(usize),

    #[error("unknown envelope version byte {0:#04x}")]
    UnknownVersion(u8),

    #[error("ciphertext is truncated")]
    Truncated,

    #[error("decryption failed: wrong password or tampered data")]
    DecryptionFailed,

    #[error("repository key metadata is missing entry {0:?}")]
    MetaEntryMissing(&'static str),

    #[error("repository key metadata is malformed: {0}")]
    MetaMalformed(String),
}

pub type Result<T> = std::result::Result<T, PackratError>;
