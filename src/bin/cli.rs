//! otabundle CLI - Main entry point for CLI binary
//!
//! This binary provides the `otabundle` CLI for inspecting and driving the
//! bundle lifecycle outside a host app.

use anyhow::{bail, Context, Result};
use clap::Parser;
use otabundle_lib::engine::{
    cli::{
        formatter::{CliFormatter, Tone},
        Cli, Commands, MetadataAction, OutputFormat, VersionAction,
    },
    config::EngineConfig,
    host::{CommandRestarter, StaticBuildId},
    BundleEngine, InstallRequest, Resolution,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("OTABUNDLE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.format == OutputFormat::Json;

    match run_cli(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "success": false, "error": format!("{:#}", e) })
                );
            } else {
                CliFormatter::say(Tone::Failed, &format!("{:#}", e));
            }
            ExitCode::FAILURE
        }
    }
}

/// Runs one command; `Ok(false)` means the operation reported failure
async fn run_cli(cli: Cli) -> Result<bool> {
    let base_dir = match cli.get_base_dir() {
        Some(dir) => dir,
        None => EngineConfig::default_base_dir()?,
    };
    let config = EngineConfig::load_or_default(&base_dir)
        .with_context(|| format!("loading config from {}", base_dir.display()))?;
    std::fs::create_dir_all(&config.base_dir)
        .with_context(|| format!("creating {}", config.base_dir.display()))?;

    let build_id = cli.build_id.clone().or_else(|| config.build_id.clone());
    if needs_build_id(&cli.command) && build_id.is_none() {
        bail!("no host build id: pass --build-id or set build_id in the config file");
    }

    let engine = BundleEngine::from_config(
        &config,
        Arc::new(StaticBuildId(build_id.unwrap_or_default())),
    )?
    .with_restarter(Arc::new(CommandRestarter::new(bootstrap_path()?, Vec::new())));
    let json = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Install {
            archive,
            extension,
            sha256,
            signature,
        } => {
            let staged = stage_archive(&archive, &config.payload_root())?;
            let mut request = InstallRequest::new(
                staged,
                extension.unwrap_or_else(|| config.extension.clone()),
            );
            if let Some(digest) = sha256 {
                request = request.with_sha256(digest);
            }
            if let Some(signature) = signature {
                request = request.with_signature(signature);
            }

            let installed = engine.install_package(request).await?;
            let record = engine.status()?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "success": installed, "path": record.path })
                );
            } else {
                CliFormatter::say(Tone::Done, &format!("Installed {}", record.path));
            }
            Ok(installed)
        }
        Commands::Resolve => {
            let resolution = engine.resolve();
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "bundle": resolution.bundle(),
                        "default": resolution.is_default(),
                    })
                );
            } else {
                match &resolution {
                    Resolution::Installed(path) => {
                        CliFormatter::say(Tone::Done, &path.display().to_string())
                    }
                    Resolution::Default { bundle, reason } => {
                        CliFormatter::say(Tone::Notice, &format!("{} (default: {:?})", bundle, reason))
                    }
                }
            }
            Ok(true)
        }
        Commands::Rollback => {
            let rolled_back = engine.rollback_to_previous().await;
            report(json, rolled_back, "Rolled back to previous payload", "Nothing to roll back");
            Ok(rolled_back)
        }
        Commands::Delete => {
            let deleted = engine.delete_current_and_previous().await;
            report(json, deleted, "Deleted installed payloads", "Some payloads could not be deleted");
            Ok(deleted)
        }
        Commands::Version { action } => match action {
            VersionAction::Get => {
                let version = engine.get_current_version()?;
                if json {
                    println!("{}", serde_json::json!({ "version": version }));
                } else {
                    println!("{}", version);
                }
                Ok(true)
            }
            VersionAction::Set { version } => {
                engine.set_current_version(&version)?;
                report(json, true, &format!("Version set to {}", version), "");
                Ok(true)
            }
        },
        Commands::Metadata { action } => match action {
            MetadataAction::Get => {
                let metadata = engine.get_metadata()?;
                if json {
                    println!("{}", serde_json::json!({ "metadata": metadata }));
                } else {
                    match metadata {
                        Some(m) => println!("{}", m),
                        None => CliFormatter::say(Tone::Notice, "No metadata stored"),
                    }
                }
                Ok(true)
            }
            MetadataAction::Set { metadata } => {
                engine.set_metadata(&metadata)?;
                report(json, true, "Metadata stored", "");
                Ok(true)
            }
        },
        Commands::SetPath { path } => {
            let set = engine.set_exact_path(&path).await?;
            report(
                json,
                set,
                &format!("Current payload set to {}", path.display()),
                &format!("{} is not an existing file", path.display()),
            );
            Ok(set)
        }
        Commands::Status => {
            let record = engine.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                CliFormatter::record(&record);
            }
            Ok(true)
        }
        Commands::Gc => {
            let removed = engine.sweep_orphans(&config.payload_root()).await?;
            if json {
                let removed: Vec<String> =
                    removed.iter().map(|p| p.display().to_string()).collect();
                println!("{}", serde_json::json!({ "removed": removed }));
            } else {
                CliFormatter::removed(&removed);
            }
            Ok(true)
        }
        Commands::Restart => {
            engine
                .restart_process()
                .context("relaunching through the bootstrapper")?;
            Ok(true)
        }
    }
}

fn needs_build_id(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Install { .. } | Commands::Resolve | Commands::SetPath { .. }
    )
}

fn report(json: bool, ok: bool, success: &str, failure: &str) {
    if json {
        println!("{}", serde_json::json!({ "success": ok }));
    } else if ok {
        CliFormatter::say(Tone::Done, success);
    } else {
        CliFormatter::say(Tone::Notice, failure);
    }
}

/// Copy the archive into the payload root; the installer consumes the copy
/// and extracts next to it
fn stage_archive(archive: &Path, payload_root: &Path) -> Result<PathBuf> {
    if !archive.is_file() {
        bail!("archive not found: {}", archive.display());
    }
    let file_name = archive
        .file_name()
        .with_context(|| format!("archive has no file name: {}", archive.display()))?;

    std::fs::create_dir_all(payload_root)
        .with_context(|| format!("creating {}", payload_root.display()))?;
    let staged = payload_root.join(file_name);
    if staged.canonicalize().ok() == archive.canonicalize().ok() {
        return Ok(staged);
    }
    std::fs::copy(archive, &staged)
        .with_context(|| format!("copying archive into {}", payload_root.display()))?;
    Ok(staged)
}

/// The bootstrapper ships next to this binary
fn bootstrap_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .context("current executable has no parent directory")?;
    Ok(dir.join(format!("otabundle-bootstrap{}", std::env::consts::EXE_SUFFIX)))
}
