//! # Command Records
//!
//! Plain request records handed from the CLI layer to the engine. The engine
//! validates preconditions against these; flag spelling and help text stay in
//! `main.rs`.

use std::path::PathBuf;

/// Create a brand-new repository from a source tree.
#[derive(Debug, Clone)]
pub struct NewCommand {
    pub version: String,
    pub source: PathBuf,
    pub location: PathBuf,
    pub password: Option<String>,
    pub zip: Option<bool>,
}

/// Capture another version into an existing repository.
#[derive(Debug, Clone)]
pub struct UpdateCommand {
    pub version: String,
    pub source: PathBuf,
    pub location: PathBuf,
    pub password: Option<String>,
    pub zip: Option<bool>,
}

/// Verify that every manifested blob is still present.
#[derive(Debug, Clone)]
pub struct CheckCommand {
    pub location: PathBuf,
    pub version: Option<String>,
}

/// Rebuild a version's tree at a destination.
#[derive(Debug, Clone)]
pub struct RestoreCommand {
    pub location: PathBuf,
    pub destination: PathBuf,
    /// `None` restores the most recent version.
    pub version_name: Option<String>,
    pub password: Option<String>,
}
