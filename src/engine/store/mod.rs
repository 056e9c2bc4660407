//! Bundle State Store
//!
//! Durable key/value storage for the bundle record. Each key is read and
//! written on its own; there is no cross-key transaction, so callers must
//! tolerate a crash between two related writes.

pub mod json;
pub mod memory;
pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid state format: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to create store pool: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Keys of the persisted bundle record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKey {
    Path,
    Version,
    /// Host build identifier captured when `Path` was published
    VersionCode,
    PreviousPath,
    PreviousVersion,
    Metadata,
}

impl StateKey {
    pub const ALL: [StateKey; 6] = [
        StateKey::Path,
        StateKey::Version,
        StateKey::VersionCode,
        StateKey::PreviousPath,
        StateKey::PreviousVersion,
        StateKey::Metadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Path => "PATH",
            Self::Version => "VERSION",
            Self::VersionCode => "VERSION_CODE",
            Self::PreviousPath => "PREVIOUS_PATH",
            Self::PreviousVersion => "PREVIOUS_VERSION",
            Self::Metadata => "METADATA",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted payload slots. The `default` slot belongs to the host and is
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Current,
    Previous,
}

impl Slot {
    pub fn path_key(&self) -> StateKey {
        match self {
            Self::Current => StateKey::Path,
            Self::Previous => StateKey::PreviousPath,
        }
    }

    pub fn version_key(&self) -> StateKey {
        match self {
            Self::Current => StateKey::Version,
            Self::Previous => StateKey::PreviousVersion,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => f.write_str("current"),
            Self::Previous => f.write_str("previous"),
        }
    }
}

/// Durable key to string mapping. Absent keys read as the empty string.
pub trait StateStore: Send + Sync {
    fn get(&self, key: StateKey) -> Result<String, StoreError>;
    fn put(&self, key: StateKey, value: &str) -> Result<(), StoreError>;

    /// Reset a key to the empty sentinel
    fn clear(&self, key: StateKey) -> Result<(), StoreError> {
        self.put(key, "")
    }
}

/// Snapshot of every key in the store, for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub path: String,
    pub version: String,
    pub installed_build_id: String,
    pub previous_path: String,
    pub previous_version: String,
    pub metadata: String,
}

impl BundleRecord {
    pub fn load(store: &dyn StateStore) -> Result<Self, StoreError> {
        Ok(Self {
            path: store.get(StateKey::Path)?,
            version: store.get(StateKey::Version)?,
            installed_build_id: store.get(StateKey::VersionCode)?,
            previous_path: store.get(StateKey::PreviousPath)?,
            previous_version: store.get(StateKey::PreviousVersion)?,
            metadata: store.get(StateKey::Metadata)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_snapshot_of_empty_store() {
        let store = MemoryStore::new();
        let record = BundleRecord::load(&store).unwrap();
        assert_eq!(record, BundleRecord::default());
    }

    #[test]
    fn test_slot_keys() {
        assert_eq!(Slot::Current.path_key(), StateKey::Path);
        assert_eq!(Slot::Previous.path_key(), StateKey::PreviousPath);
        assert_eq!(Slot::Previous.version_key(), StateKey::PreviousVersion);
    }
}
