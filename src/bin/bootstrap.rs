//! otabundle Bootstrapper
//!
//! A tiny launcher that resolves which payload to load and hands it to the
//! runtime. It only reads state (plus the resolver's self-healing resets);
//! it never installs anything.
//!
//! ## Responsibilities
//! 1. Load otabundle.config.json from `OTABUNDLE_HOME` or the data directory
//! 2. Resolve the payload for this start
//! 3. Print it, or launch `runtime_command` with it appended

use std::env;
use std::path::PathBuf;
use std::process::{Command, ExitCode};
use std::sync::Arc;

use otabundle_lib::engine::{config::EngineConfig, host::StaticBuildId, BundleEngine};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("OTABUNDLE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let base_dir = match env::var_os("OTABUNDLE_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => match EngineConfig::default_base_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
    };

    let config = match EngineConfig::load_or_default(&base_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Without a build id every stored payload would look stale and be reset
    let Some(build_id) = config.build_id.clone() else {
        eprintln!("Error: build_id is not set in {}", base_dir.display());
        return ExitCode::FAILURE;
    };

    let engine = match BundleEngine::from_config(&config, Arc::new(StaticBuildId(build_id))) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let bundle = engine.resolve().bundle();

    let Some((program, prefix_args)) = config
        .runtime_command
        .as_deref()
        .and_then(|cmd| cmd.split_first())
    else {
        println!("{}", bundle);
        return ExitCode::SUCCESS;
    };

    // Collect args (skip our own binary name)
    let args: Vec<String> = env::args().skip(1).collect();
    let mut command = Command::new(program);
    command.args(prefix_args).arg(&bundle).args(&args);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = command.exec();
        eprintln!("Failed to exec {}: {}", program, err);
        ExitCode::FAILURE
    }

    #[cfg(not(unix))]
    {
        match command.status() {
            Ok(status) if status.success() => ExitCode::SUCCESS,
            Ok(status) => ExitCode::from(status.code().unwrap_or(1) as u8),
            Err(e) => {
                eprintln!("Failed to launch {}: {}", program, e);
                ExitCode::FAILURE
            }
        }
    }
}
