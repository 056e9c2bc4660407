//! Payload Installer
//!
//! Turns a local archive into the published current payload:
//! backup → (verify) → extract → validate → drop archive → publish → read back.
//!
//! Every step must finish before the next starts and nothing is retried. The
//! new payload only becomes visible when `PATH` is written; until then the
//! extraction directory is inert and the previous state stays loadable.
//! `PATH` and `VERSION_CODE` are two separate writes, so a crash between
//! them leaves a path the Resolver rejects on build-id mismatch.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::cleanup::Cleanup;
use super::error::{BundleError, InstallStep, Result};
use super::extract::ArchiveExtractor;
use super::host::BuildIdProvider;
use super::layout::is_readable_file;
use super::store::{Slot, StateKey, StateStore};
use super::verify::{ArchiveVerifier, VerifyError};

pub const DEFAULT_EXTENSION: &str = ".bundle";

/// A request to install one archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub archive: PathBuf,
    pub extension: String,
    /// Hex SHA-256 the archive must match
    pub expected_sha256: Option<String>,
    /// Hex ED25519 signature over the archive digest
    pub signature: Option<String>,
}

impl InstallRequest {
    pub fn new(archive: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            archive: archive.into(),
            extension: extension.into(),
            expected_sha256: None,
            signature: None,
        }
    }

    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

pub struct Installer<'a> {
    store: &'a dyn StateStore,
    build: &'a dyn BuildIdProvider,
    extractor: &'a ArchiveExtractor,
    verifier: &'a ArchiveVerifier,
}

impl<'a> Installer<'a> {
    pub fn new(
        store: &'a dyn StateStore,
        build: &'a dyn BuildIdProvider,
        extractor: &'a ArchiveExtractor,
        verifier: &'a ArchiveVerifier,
    ) -> Self {
        Self {
            store,
            build,
            extractor,
            verifier,
        }
    }

    pub fn install(&self, request: &InstallRequest) -> Result<bool> {
        let archive = request.archive.as_path();
        info!(
            archive = %archive.display(),
            extension = %request.extension,
            signed = request.signature.is_some(),
            "install started"
        );

        if !archive.is_file() {
            return Err(BundleError::ArchiveInvalid {
                path: archive.to_path_buf(),
                reason: "not an existing regular file".to_string(),
            }
            .at(InstallStep::Precondition));
        }

        // Rejected before the backup so the previous payload is not retired
        if self.verifier.requires_signature() && request.signature.is_none() {
            remove_archive(archive);
            return Err(BundleError::from(VerifyError::MissingSignature).at(InstallStep::Integrity));
        }

        self.back_up_current()
            .map_err(|e| e.at(InstallStep::Backup))?;

        if let Err(e) = self.verifier.verify_archive(
            archive,
            request.expected_sha256.as_deref(),
            request.signature.as_deref(),
        ) {
            remove_archive(archive);
            return Err(BundleError::from(e).at(InstallStep::Integrity));
        }

        let payload = match self.extractor.extract(archive, &request.extension) {
            Ok(payload) => payload,
            Err(e) => {
                remove_archive(archive);
                return Err(e.at(InstallStep::Extract));
            }
        };

        if !is_readable_file(&payload) {
            remove_archive(archive);
            return Err(BundleError::TargetNotFound {
                archive: archive.to_path_buf(),
                extension: request.extension.clone(),
            }
            .at(InstallStep::Validate));
        }

        remove_archive(archive);

        let published = self
            .publish(&payload)
            .map_err(|e| e.at(InstallStep::Publish))?;
        self.verify_published(&published)
            .map_err(|e| e.at(InstallStep::ReadBack))?;

        info!(payload = %published.path, build_id = %published.build_id, "install complete");
        Ok(true)
    }

    /// Move the current slot into the previous slot. The payload the backup
    /// displaces is retired first unless it is the current payload itself.
    fn back_up_current(&self) -> Result<()> {
        let current = self.store.get(StateKey::Path)?;
        if current.is_empty() {
            info!("no current payload to back up");
            return Ok(());
        }

        let displaced = self.store.get(StateKey::PreviousPath)?;
        if !displaced.is_empty() && displaced != current {
            let cleanup = Cleanup::new(self.store, self.extractor.layout());
            if !cleanup.delete_payload(Slot::Previous) {
                // Leaks disk space only; sweep_orphans reclaims it later
                warn!(path = %displaced, "could not retire displaced previous payload");
            }
        }

        // The previous pair is replaced as a whole, an unset version included
        let version = self.store.get(Slot::Current.version_key())?;
        self.store.put(Slot::Previous.path_key(), &current)?;
        self.store.put(Slot::Previous.version_key(), &version)?;
        info!(previous = %current, previous_version = %version, "current payload backed up");
        Ok(())
    }

    fn publish(&self, payload: &Path) -> Result<Published> {
        let path = payload
            .to_str()
            .ok_or_else(|| {
                BundleError::ExtractionFailed(format!(
                    "payload path is not valid UTF-8: {}",
                    payload.display()
                ))
            })?
            .to_string();
        let build_id = self.build.build_id();

        self.store.put(StateKey::Path, &path)?;
        self.store.put(StateKey::VersionCode, &build_id)?;
        info!(path = %path, build_id = %build_id, "payload published");

        Ok(Published { path, build_id })
    }

    fn verify_published(&self, expected: &Published) -> Result<()> {
        let path = self.store.get(StateKey::Path)?;
        let build_id = self.store.get(StateKey::VersionCode)?;

        if path != expected.path {
            return Err(BundleError::PublishVerificationFailed(format!(
                "PATH expected {}, got {}",
                expected.path, path
            )));
        }
        if build_id != expected.build_id {
            return Err(BundleError::PublishVerificationFailed(format!(
                "VERSION_CODE expected {}, got {}",
                expected.build_id, build_id
            )));
        }
        if !is_readable_file(Path::new(&path)) {
            return Err(BundleError::PublishVerificationFailed(format!(
                "published payload not accessible at {}",
                path
            )));
        }
        Ok(())
    }
}

struct Published {
    path: String,
    build_id: String,
}

fn remove_archive(archive: &Path) {
    match fs::remove_file(archive) {
        Ok(()) => info!(archive = %archive.display(), "archive removed"),
        Err(e) => warn!(archive = %archive.display(), error = %e, "could not remove archive"),
    }
}
