//! Engine Error Types

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::store::StoreError;
use super::verify::VerifyError;

/// The step of an install that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    /// Source archive checks
    Precondition,
    /// Backing up the current slot into the previous slot
    Backup,
    /// Optional digest/signature check of the archive
    Integrity,
    /// Unpacking the archive
    Extract,
    /// Checking the extracted payload
    Validate,
    /// Writing the new path and build id
    Publish,
    /// Reading the published values back
    ReadBack,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Precondition => "precondition",
            Self::Backup => "backup",
            Self::Integrity => "integrity",
            Self::Extract => "extract",
            Self::Validate => "validate",
            Self::Publish => "publish",
            Self::ReadBack => "read-back",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Archive invalid: {path}: {reason}")]
    ArchiveInvalid { path: PathBuf, reason: String },

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("No file ending in '{extension}' found in {archive}")]
    TargetNotFound { archive: PathBuf, extension: String },

    #[error("Publish verification failed: {0}")]
    PublishVerificationFailed(String),

    #[error("Filesystem operation denied on {path}: {source}")]
    FilesystemDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive integrity check failed: {0}")]
    IntegrityFailed(#[from] VerifyError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Install failed at {step}: {source}")]
    Install {
        step: InstallStep,
        #[source]
        source: Box<BundleError>,
    },

    #[error("Install task aborted: {0}")]
    InstallAborted(String),
}

impl BundleError {
    pub(crate) fn denied(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FilesystemDenied {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn at(self, step: InstallStep) -> Self {
        match self {
            already @ Self::Install { .. } => already,
            other => Self::Install {
                step,
                source: Box::new(other),
            },
        }
    }

    /// The install step that failed, if this error came from the installer
    pub fn step(&self) -> Option<InstallStep> {
        match self {
            Self::Install { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The underlying error with any install-step wrapper removed
    pub fn root(&self) -> &BundleError {
        match self {
            Self::Install { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_wrapping_is_not_nested() {
        let err = BundleError::ExtractionFailed("bad zip".into())
            .at(InstallStep::Extract)
            .at(InstallStep::Publish);

        assert_eq!(err.step(), Some(InstallStep::Extract));
        assert!(matches!(err.root(), BundleError::ExtractionFailed(_)));
        assert_eq!(
            err.to_string(),
            "Install failed at extract: Extraction failed: bad zip"
        );
    }
}
