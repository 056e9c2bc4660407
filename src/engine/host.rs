//! Host Capabilities
//!
//! Things the host application supplies to the engine: its own build
//! identifier, the build-time bundled payload and a way to restart itself.

use std::io;
use std::path::PathBuf;
use std::process::Command;

/// Returns a stable identifier for the currently installed host build
pub trait BuildIdProvider: Send + Sync {
    fn build_id(&self) -> String;
}

/// Returns the payload reference bundled into the host at build time
pub trait DefaultBundleProvider: Send + Sync {
    fn default_bundle(&self) -> String;
}

/// Restarts the host process so the runtime loader picks up a new payload
pub trait Restarter: Send + Sync {
    fn restart(&self) -> io::Result<()>;
}

impl<F> BuildIdProvider for F
where
    F: Fn() -> String + Send + Sync,
{
    fn build_id(&self) -> String {
        self()
    }
}

#[derive(Debug, Clone)]
pub struct StaticBuildId(pub String);

impl BuildIdProvider for StaticBuildId {
    fn build_id(&self) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Clone)]
pub struct StaticDefaultBundle(pub String);

impl DefaultBundleProvider for StaticDefaultBundle {
    fn default_bundle(&self) -> String {
        self.0.clone()
    }
}

/// Restarter for hosts that cannot restart themselves
#[derive(Debug, Clone, Default)]
pub struct NoopRestarter;

impl Restarter for NoopRestarter {
    fn restart(&self) -> io::Result<()> {
        tracing::warn!("restart requested but no restarter is configured");
        Ok(())
    }
}

/// Replaces the current process with `program args...`.
///
/// On Unix this `exec`s and only returns on failure. Elsewhere the program
/// is spawned and the current process exits with its status.
#[derive(Debug, Clone)]
pub struct CommandRestarter {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandRestarter {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable with the current arguments
    pub fn current_process() -> io::Result<Self> {
        let program = std::env::current_exe()?;
        let args = std::env::args().skip(1).collect();
        Ok(Self::new(program, args))
    }
}

impl Restarter for CommandRestarter {
    fn restart(&self) -> io::Result<()> {
        tracing::info!(program = %self.program.display(), "restarting host process");

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let err = Command::new(&self.program).args(&self.args).exec();
            Err(err)
        }

        #[cfg(not(unix))]
        {
            let status = Command::new(&self.program).args(&self.args).status()?;
            std::process::exit(status.code().unwrap_or(1));
        }
    }
}
