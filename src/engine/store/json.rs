//! JSON file state store
//!
//! Keeps every key in one `state.json`. Each `put` rewrites the file through
//! a temp file and a rename, so a single key write is atomic on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{StateKey, StateStore, StoreError};

pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store at `path`. The file is created on first write.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(values)?;

        // Write to temp file first, then rename (atomic)
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: StateKey) -> Result<String, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let values = self.read_all()?;
        Ok(values.get(key.as_str()).cloned().unwrap_or_default())
    }

    fn put(&self, key: StateKey, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut values = self.read_all()?;
        values.insert(key.as_str().to_string(), value.to_string());
        self.write_all(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("state.json");

        let store = JsonFileStore::open(&state_path).unwrap();
        store.put(StateKey::Path, "/data/output_1/app.bundle").unwrap();
        store.put(StateKey::VersionCode, "42").unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&state_path).unwrap();
        assert_eq!(
            reopened.get(StateKey::Path).unwrap(),
            "/data/output_1/app.bundle"
        );
        assert_eq!(reopened.get(StateKey::VersionCode).unwrap(), "42");
        assert_eq!(reopened.get(StateKey::Version).unwrap(), "");
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let store = JsonFileStore::open(&state_path).unwrap();
        store.put(StateKey::Metadata, "{\"notes\":\"hotfix\"}").unwrap();

        assert!(state_path.exists());
        assert!(!state_path.with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        fs::write(&state_path, "not json").unwrap();

        let store = JsonFileStore::open(&state_path).unwrap();
        assert!(matches!(store.get(StateKey::Path), Err(StoreError::Json(_))));
    }
}
