//! Startup Resolver
//!
//! Decides which payload the runtime loader gets at process start. Never
//! fails: anything inconsistent degrades to the build-time default bundle,
//! resetting the stored path so the next start does not repeat the work.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::host::{BuildIdProvider, DefaultBundleProvider};
use super::layout::is_readable_file;
use super::store::{StateKey, StateStore, StoreError};

/// Why the default bundle was chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// Nothing installed (first launch or data cleared)
    NoPayload,
    /// Payload was published for another host build
    BuildMismatch { stored: String, current: String },
    /// The stored file is missing or unreadable
    Unreadable(PathBuf),
    /// The state store could not be read or written
    StoreUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Installed(PathBuf),
    Default {
        bundle: String,
        reason: FallbackReason,
    },
}

impl Resolution {
    /// The reference to hand to the runtime loader
    pub fn bundle(&self) -> String {
        match self {
            Self::Installed(path) => path.to_string_lossy().into_owned(),
            Self::Default { bundle, .. } => bundle.clone(),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default { .. })
    }
}

pub struct Resolver<'a> {
    store: &'a dyn StateStore,
    build: &'a dyn BuildIdProvider,
    default_bundle: &'a dyn DefaultBundleProvider,
}

impl<'a> Resolver<'a> {
    pub fn new(
        store: &'a dyn StateStore,
        build: &'a dyn BuildIdProvider,
        default_bundle: &'a dyn DefaultBundleProvider,
    ) -> Self {
        Self {
            store,
            build,
            default_bundle,
        }
    }

    pub fn resolve(&self) -> Resolution {
        match self.try_resolve() {
            Ok(Ok(path)) => {
                info!(path = %path.display(), "loading installed payload");
                Resolution::Installed(path)
            }
            Ok(Err(reason)) => self.fallback(reason),
            Err(e) => {
                warn!(error = %e, "state store unavailable, loading default bundle");
                self.fallback(FallbackReason::StoreUnavailable(e.to_string()))
            }
        }
    }

    fn fallback(&self, reason: FallbackReason) -> Resolution {
        let bundle = self.default_bundle.default_bundle();
        info!(?reason, bundle = %bundle, "loading default bundle");
        Resolution::Default { bundle, reason }
    }

    fn try_resolve(&self) -> Result<Result<PathBuf, FallbackReason>, StoreError> {
        let path = self.store.get(StateKey::Path)?;
        let version = self.store.get(StateKey::Version)?;
        let stored_build = self.store.get(StateKey::VersionCode)?;
        let current_build = self.build.build_id();

        debug!(
            path = %path,
            version = %version,
            stored_build = %stored_build,
            current_build = %current_build,
            "resolving payload"
        );

        if path.is_empty() || stored_build != current_build {
            let reason = if path.is_empty() {
                FallbackReason::NoPayload
            } else {
                warn!(stored = %stored_build, current = %current_build, "payload built for another host build");
                FallbackReason::BuildMismatch {
                    stored: stored_build,
                    current: current_build,
                }
            };
            self.reset(&path, &version)?;
            return Ok(Err(reason));
        }

        let payload = PathBuf::from(&path);
        if !is_readable_file(&payload) {
            warn!(path = %path, "stored payload is not readable");
            log_parent_listing(&payload);
            self.reset(&path, &version)?;
            return Ok(Err(FallbackReason::Unreadable(payload)));
        }

        Ok(Ok(payload))
    }

    /// Clear `path` and `version`, writing only keys that are set so a
    /// repeated resolve leaves the store untouched
    fn reset(&self, path: &str, version: &str) -> Result<(), StoreError> {
        if !version.is_empty() {
            info!(version = %version, "resetting stored version");
            self.store.clear(StateKey::Version)?;
        }
        if !path.is_empty() {
            info!(path = %path, "clearing stored payload path");
            self.store.clear(StateKey::Path)?;
        }
        Ok(())
    }
}

fn log_parent_listing(payload: &Path) {
    let Some(parent) = payload.parent() else {
        return;
    };
    let Ok(entries) = fs::read_dir(parent) else {
        debug!(parent = %parent.display(), "payload parent directory does not exist");
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        debug!(entry = %path.display(), is_dir = path.is_dir(), "payload parent entry");
    }
}
