//! Archive Verification
//!
//! Optional, caller-supplied integrity checks run before an archive is
//! extracted: a SHA-256 digest and an ED25519 signature over that digest.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Verification errors
#[derive(Debug)]
pub enum VerifyError {
    IoError(io::Error),
    ChecksumMismatch { expected: String, actual: String },
    MissingSignature,
    InvalidSignature,
    InvalidPublicKey,
    ParseError(String),
}

impl From<io::Error> for VerifyError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "IO error: {}", e),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "Checksum mismatch: expected {}, got {}", expected, actual)
            }
            Self::MissingSignature => write!(f, "Archive signature required but not supplied"),
            Self::InvalidSignature => write!(f, "Invalid signature"),
            Self::InvalidPublicKey => write!(f, "Invalid public key"),
            Self::ParseError(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Verifier for downloaded archives
#[derive(Debug, Clone, Default)]
pub struct ArchiveVerifier {
    /// Trusted key; when set, every install must carry a valid signature
    public_key: Option<VerifyingKey>,
}

impl ArchiveVerifier {
    /// A verifier that only checks digests the caller supplies
    pub fn new() -> Self {
        Self { public_key: None }
    }

    pub fn with_public_key(key_bytes: &[u8; 32]) -> Result<Self, VerifyError> {
        let public_key =
            VerifyingKey::from_bytes(key_bytes).map_err(|_| VerifyError::InvalidPublicKey)?;
        Ok(Self {
            public_key: Some(public_key),
        })
    }

    /// Parse a hex-encoded 32-byte public key
    pub fn from_hex_key(key_hex: &str) -> Result<Self, VerifyError> {
        let bytes = hex::decode(key_hex.trim()).map_err(|e| VerifyError::ParseError(e.to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VerifyError::InvalidPublicKey)?;
        Self::with_public_key(&key)
    }

    pub fn requires_signature(&self) -> bool {
        self.public_key.is_some()
    }

    /// SHA256 digest of a file
    pub fn digest_file(path: &Path) -> Result<[u8; 32], VerifyError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();

        let mut buffer = [0u8; 8192];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize().into())
    }

    /// Hex SHA256 checksum of a file
    pub fn calculate_sha256(path: &Path) -> Result<String, VerifyError> {
        Ok(hex::encode(Self::digest_file(path)?))
    }

    /// Check an archive against an optional expected digest and an optional
    /// hex signature. The signature covers the raw 32-byte digest.
    pub fn verify_archive(
        &self,
        path: &Path,
        expected_sha256: Option<&str>,
        signature_hex: Option<&str>,
    ) -> Result<(), VerifyError> {
        if expected_sha256.is_none() && self.public_key.is_none() {
            return Ok(());
        }

        let digest = Self::digest_file(path)?;

        if let Some(expected) = expected_sha256 {
            let actual = hex::encode(digest);
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(VerifyError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        if let Some(public_key) = &self.public_key {
            let signature_hex = signature_hex.ok_or(VerifyError::MissingSignature)?;
            let sig_bytes = hex::decode(signature_hex.trim())
                .map_err(|e| VerifyError::ParseError(e.to_string()))?;
            let sig_array: [u8; 64] = sig_bytes
                .try_into()
                .map_err(|_| VerifyError::InvalidSignature)?;
            let signature = Signature::from_bytes(&sig_array);

            public_key
                .verify(&digest, &signature)
                .map_err(|_| VerifyError::InvalidSignature)?;
        }

        Ok(())
    }
}
