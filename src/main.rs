//! # packrat
//!
//! A content-addressed, deduplicating file backup tool.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌─────────────┐
//!                  │  CLI (clap)  │
//!                  └──────┬──────┘
//!                         │
//!                  ┌──────▼──────┐
//!                  │   Engine    │  new / update / check / restore
//!                  └──────┬──────┘
//!            ┌────────────┼────────────┐
//!            ▼            ▼            ▼
//!       ┌─────────┐  ┌──────────┐  ┌──────────┐
//!       │ Analyzer │  │ Filestore │  │ Manifest │
//!       │ (walk +  │  │ (SHA-1   │  │    DB    │
//!       │  SHA-1)  │  │  CAS)    │  │  (CSV)   │
//!       └─────────┘  └────┬─────┘  └──────────┘
//!                         ▼
//!                  ┌────────────┐
//!                  │   Crypto   │  optional AES-CBC sealing
//!                  └────────────┘
//! ```
//!
//! Every unique file content is stored once, keyed by its SHA-1 digest, under
//! a four-level hash-sharded `data/` tree. Each named version is an
//! append-only CSV manifest binding restore paths to content hashes.

mod analyze;
mod commands;
mod config;
mod crypto;
mod db;
mod engine;
mod error;
mod filestore;
mod models;
mod pathutil;

use clap::{Parser, Subcommand};
use commands::{CheckCommand, NewCommand, RestoreCommand, UpdateCommand};
use std::path::{Path, PathBuf};

/// packrat: a deduplicating backup tool with content-addressable storage
#[derive(Parser, Debug)]
#[command(
    name = "packrat",
    version,
    about = "A deduplicating backup tool with content-addressable storage",
    long_about = "packrat captures directory trees into a backup repository. \
                  File contents are stored once per unique SHA-1 digest, so \
                  identical files across versions share storage. Each capture \
                  is a named version that can be verified and restored \
                  independently."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML file overriding store tunables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new backup repository from a source directory
    New {
        /// Source directory to back up
        source: PathBuf,

        /// Destination of the backup; must be a new directory
        location: PathBuf,

        /// Version name (defaults to the current local time, YYYY-MM-DDTHHMMSS)
        #[arg(short, long)]
        name: Option<String>,

        /// Store eligible blobs as zip archives
        #[arg(short, long)]
        zip: bool,

        /// Encrypt blobs with this password (or set PACKRAT_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Capture a new version into an existing repository
    Update {
        /// Source directory to back up
        source: PathBuf,

        /// Existing backup repository
        location: PathBuf,

        /// Version name (defaults to the current local time, YYYY-MM-DDTHHMMSS)
        #[arg(short, long)]
        name: Option<String>,

        /// Store eligible blobs as zip archives
        #[arg(short, long)]
        zip: bool,

        /// Password of an encrypted repository (or set PACKRAT_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Verify that every manifested blob is present in the content store
    Check {
        /// Existing backup repository
        location: PathBuf,

        /// Check only this version (default: all versions)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Restore a version into an empty destination directory
    Restore {
        /// Existing backup repository
        location: PathBuf,

        /// Destination directory; must not exist or be empty
        destination: PathBuf,

        /// Version to restore (default: the most recent)
        #[arg(short, long)]
        name: Option<String>,

        /// Password of an encrypted repository (or set PACKRAT_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// List the versions in a repository
    List {
        /// Existing backup repository
        location: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", colored::Colorize::red("error:"), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> error::Result<()> {
    let overrides = match &cli.config {
        Some(path) => config::Overrides::load(path)?,
        None => config::Overrides::default(),
    };

    match cli.command {
        Command::New {
            source,
            location,
            name,
            zip,
            password,
        } => {
            print_header("New backup");
            let command = NewCommand {
                version: name.unwrap_or_else(default_version_name),
                source,
                location,
                password: password_or_env(password),
                zip: zip.then_some(true),
            };
            engine::new(&command, &overrides)?;
            Ok(())
        }

        Command::Update {
            source,
            location,
            name,
            zip,
            password,
        } => {
            print_header("Update");
            let command = UpdateCommand {
                version: name.unwrap_or_else(default_version_name),
                source,
                location,
                password: password_or_env(password),
                zip: zip.then_some(true),
            };
            engine::update(&command, &overrides)?;
            Ok(())
        }

        Command::Check { location, name } => {
            print_header("Check");
            let command = CheckCommand {
                location,
                version: name,
            };
            let errors = engine::check(&command, &overrides)?;
            if !errors.is_empty() {
                eprintln!();
                eprintln!(
                    "  {} {} missing blob(s)",
                    colored::Colorize::red("✗"),
                    errors.len(),
                );
                std::process::exit(1);
            }
            Ok(())
        }

        Command::Restore {
            location,
            destination,
            name,
            password,
        } => {
            print_header("Restore");
            let command = RestoreCommand {
                location,
                destination,
                version_name: name,
                password: password_or_env(password),
            };
            let restored = engine::restore(&command, &overrides)?;
            eprintln!();
            eprintln!(
                "  {} Restored {restored} file(s)",
                colored::Colorize::green("✓"),
            );
            Ok(())
        }

        Command::List { location } => cmd_list(&location, &overrides),
    }
}

fn cmd_list(location: &Path, overrides: &config::Overrides) -> error::Result<()> {
    if !location.exists() {
        return Err(error::ValidationError::RepositoryMissing(location.to_path_buf()).into());
    }

    let db = db::ManifestDb::new(overrides.db_config(location))?;
    let versions = db.get_all_versions()?;
    let most_recent = db.get_most_recent_version()?;

    if versions.is_empty() {
        eprintln!("No versions found.");
        return Ok(());
    }

    for version in &versions {
        let dirs = db.get_dirs_for_version(version)?.len();
        let files = db.get_files_for_version(version)?.len();
        let marker = if Some(version) == most_recent.as_ref() {
            "  (most recent)"
        } else {
            ""
        };
        eprintln!(
            "  {:30}  {dirs:>6} dir(s)  {files:>6} file(s){marker}",
            version.name,
        );
    }
    eprintln!();
    eprintln!("  {} version(s)", versions.len());

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// The conventional default version name: local time as `YYYY-MM-DDTHHMMSS`.
fn default_version_name() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H%M%S").to_string()
}

fn password_or_env(password: Option<String>) -> Option<String> {
    password.or_else(|| std::env::var("PACKRAT_PASSWORD").ok())
}

fn print_header(action: &str) {
    eprintln!();
    eprintln!(
        "  {} packrat v{} — {action}",
        colored::Colorize::bold("⚡"),
        env!("CARGO_PKG_VERSION"),
    );
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_version_name_is_filesystem_safe() {
        let name = default_version_name();
        assert_eq!(name.len(), "2024-01-01T000000".len());
        assert!(!name.contains('/'));
        assert!(!name.contains(':'));
    }
}
