//! Rollback Manager
//!
//! Swaps the previous slot back into the current slot. The current payload is
//! deleted first; if that fails nothing in the store changes, so a usable
//! rollback target is never lost to a failed delete.

use tracing::{info, warn};

use super::cleanup::Cleanup;
use super::layout::PayloadLayout;
use super::store::{Slot, StateKey, StateStore, StoreError};

pub struct RollbackManager<'a> {
    store: &'a dyn StateStore,
    layout: &'a PayloadLayout,
}

impl<'a> RollbackManager<'a> {
    pub fn new(store: &'a dyn StateStore, layout: &'a PayloadLayout) -> Self {
        Self { store, layout }
    }

    pub fn rollback_to_previous(&self) -> bool {
        match self.try_rollback() {
            Ok(rolled_back) => rolled_back,
            Err(e) => {
                warn!(error = %e, "rollback aborted by state store error");
                false
            }
        }
    }

    fn try_rollback(&self) -> Result<bool, StoreError> {
        let previous_path = self.store.get(StateKey::PreviousPath)?;
        let previous_version = self.store.get(StateKey::PreviousVersion)?;

        if previous_path.is_empty() {
            info!("no previous payload to roll back to");
            return Ok(false);
        }

        // A failed install backs up before it fails, leaving both slots on
        // the same payload
        if previous_path == self.store.get(StateKey::Path)? {
            info!(path = %previous_path, "previous payload is the current one, nothing to roll back");
            return Ok(false);
        }

        if !Cleanup::new(self.store, self.layout).delete_payload(Slot::Current) {
            warn!("current payload could not be deleted, rollback skipped");
            return Ok(false);
        }

        self.store.put(StateKey::Path, &previous_path)?;
        self.store.clear(StateKey::PreviousPath)?;

        if previous_version.is_empty() {
            self.store.clear(StateKey::Version)?;
        } else {
            self.store.put(StateKey::Version, &previous_version)?;
        }
        self.store.clear(StateKey::PreviousVersion)?;

        info!(path = %previous_path, version = %previous_version, "rolled back to previous payload");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::MemoryStore;
    use std::fs;
    use tempfile::tempdir;

    fn payload_in(dir: &std::path::Path, name: &str, contents: &[u8]) -> String {
        let output = dir.join(name);
        fs::create_dir_all(&output).unwrap();
        let payload = output.join("app.bundle");
        fs::write(&payload, contents).unwrap();
        payload.to_string_lossy().to_string()
    }

    #[test]
    fn test_nothing_to_roll_back() {
        let store = MemoryStore::new();
        let layout = PayloadLayout::default();
        assert!(!RollbackManager::new(&store, &layout).rollback_to_previous());
    }

    #[test]
    fn test_rollback_promotes_previous() {
        let dir = tempdir().unwrap();
        let p1 = payload_in(dir.path(), "output_20250101_000000", b"A");
        let p2 = payload_in(dir.path(), "output_20250102_000000", b"B");

        let store = MemoryStore::with_entries([
            (StateKey::Path, p2.clone()),
            (StateKey::Version, "2".to_string()),
            (StateKey::PreviousPath, p1.clone()),
            (StateKey::PreviousVersion, "1".to_string()),
        ]);
        let layout = PayloadLayout::default();
        let manager = RollbackManager::new(&store, &layout);

        assert!(manager.rollback_to_previous());
        assert_eq!(store.get(StateKey::Path).unwrap(), p1);
        assert_eq!(store.get(StateKey::Version).unwrap(), "1");
        assert_eq!(store.get(StateKey::PreviousPath).unwrap(), "");
        assert_eq!(store.get(StateKey::PreviousVersion).unwrap(), "");
        assert!(!std::path::Path::new(&p2).exists());

        assert!(!manager.rollback_to_previous());
    }

    #[test]
    fn test_previous_equal_to_current_is_left_alone() {
        let dir = tempdir().unwrap();
        let p1 = payload_in(dir.path(), "output_20250101_000000", b"A");

        let store = MemoryStore::with_entries([
            (StateKey::Path, p1.clone()),
            (StateKey::PreviousPath, p1.clone()),
        ]);
        let layout = PayloadLayout::default();

        assert!(!RollbackManager::new(&store, &layout).rollback_to_previous());
        assert!(std::path::Path::new(&p1).exists());
        assert_eq!(store.get(StateKey::Path).unwrap(), p1);
    }

    #[test]
    fn test_rollback_without_previous_version_clears_version() {
        let dir = tempdir().unwrap();
        let p1 = payload_in(dir.path(), "output_20250101_000000", b"A");
        let p2 = payload_in(dir.path(), "output_20250102_000000", b"B");

        let store = MemoryStore::with_entries([
            (StateKey::Path, p2),
            (StateKey::Version, "2".to_string()),
            (StateKey::PreviousPath, p1),
        ]);
        let layout = PayloadLayout::default();

        assert!(RollbackManager::new(&store, &layout).rollback_to_previous());
        assert_eq!(store.get(StateKey::Version).unwrap(), "");
    }
}
