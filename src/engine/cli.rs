//! otabundle CLI Module
//! Command-line interface for driving the bundle engine by hand

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod formatter;

#[derive(Parser, Debug)]
#[command(name = "otabundle")]
#[command(version)]
#[command(about = "Over-the-air script bundle manager", long_about = None)]
pub struct Cli {
    /// Directory holding otabundle.config.json, state and payloads
    #[arg(short, long, global = true, env = "OTABUNDLE_HOME")]
    pub base_dir: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Host build identifier, overrides the config file
    #[arg(long, global = true)]
    pub build_id: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install a payload archive
    Install {
        /// Archive to install (zip or tar.gz); copied into the payload directory first
        archive: PathBuf,

        /// Payload file extension to look for
        #[arg(short, long)]
        extension: Option<String>,

        /// Expected SHA-256 of the archive (hex)
        #[arg(long)]
        sha256: Option<String>,

        /// ED25519 signature over the archive digest (hex)
        #[arg(long)]
        signature: Option<String>,
    },

    /// Print the payload the runtime would load now
    Resolve,

    /// Swap the previous payload back in
    Rollback,

    /// Delete both installed payloads
    Delete,

    /// Version label management
    Version {
        #[command(subcommand)]
        action: VersionAction,
    },

    /// Free-form metadata management
    Metadata {
        #[command(subcommand)]
        action: MetadataAction,
    },

    /// Point the current slot at an existing file
    SetPath {
        path: PathBuf,
    },

    /// Show the stored state
    Status,

    /// Remove leftover staging and unreferenced output directories
    Gc,

    /// Relaunch through the bootstrapper
    Restart,
}

#[derive(Subcommand, Debug)]
pub enum VersionAction {
    /// Print the current version label
    Get,

    /// Set the current version label
    Set {
        version: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum MetadataAction {
    /// Print stored metadata
    Get,

    /// Replace stored metadata
    Set {
        metadata: String,
    },
}

impl Cli {
    pub fn get_base_dir(&self) -> Option<PathBuf> {
        self.base_dir.clone()
    }
}
