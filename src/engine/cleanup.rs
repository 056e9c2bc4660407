//! Payload Cleanup
//!
//! Physically removes a slot's payload. A payload whose parent directory is
//! a generated output directory owns that directory, so the whole directory
//! goes. Anything else (legacy flat files, unknown parents) loses only the
//! payload file; its parent may be shared.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::layout::PayloadLayout;
use super::store::{Slot, StateStore, StoreError};

/// What a delete actually removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// The slot was empty
    Nothing,
    /// The stored file no longer existed
    AlreadyGone(PathBuf),
    /// The payload's private output directory
    Directory(PathBuf),
    /// Only the payload file
    File(PathBuf),
}

pub struct Cleanup<'a> {
    store: &'a dyn StateStore,
    layout: &'a PayloadLayout,
}

impl<'a> Cleanup<'a> {
    pub fn new(store: &'a dyn StateStore, layout: &'a PayloadLayout) -> Self {
        Self { store, layout }
    }

    /// Delete the slot's payload and clear its path key.
    ///
    /// Returns `false` only when the filesystem delete (or the store) failed;
    /// the path key is left untouched in that case.
    pub fn delete_payload(&self, slot: Slot) -> bool {
        match self.try_delete_payload(slot) {
            Ok(removal) => {
                debug!(%slot, ?removal, "payload cleanup finished");
                true
            }
            Err(e) => {
                warn!(%slot, error = %e, "payload cleanup failed");
                false
            }
        }
    }

    pub fn try_delete_payload(&self, slot: Slot) -> Result<Removal, CleanupError> {
        let key = slot.path_key();
        let stored = self.store.get(key)?;
        if stored.is_empty() {
            return Ok(Removal::Nothing);
        }

        let removal = self.remove_payload_files(Path::new(&stored))?;
        self.store.clear(key)?;
        Ok(removal)
    }

    fn remove_payload_files(&self, payload: &Path) -> Result<Removal, CleanupError> {
        if !payload.exists() {
            return Ok(Removal::AlreadyGone(payload.to_path_buf()));
        }

        match payload.parent() {
            Some(parent) if payload.is_file() && self.layout.is_output_dir(parent) => {
                info!(dir = %parent.display(), "deleting payload output directory");
                fs::remove_dir_all(parent).map_err(|e| CleanupError::Io(parent.to_path_buf(), e))?;
                Ok(Removal::Directory(parent.to_path_buf()))
            }
            _ => {
                info!(file = %payload.display(), "deleting payload file only, parent preserved");
                fs::remove_file(payload).map_err(|e| CleanupError::Io(payload.to_path_buf(), e))?;
                Ok(Removal::File(payload.to_path_buf()))
            }
        }
    }

    /// Remove leftover staging directories and output directories under
    /// `root` that no slot references. Returns what was removed.
    pub fn sweep_orphans(&self, root: &Path) -> Result<Vec<PathBuf>, CleanupError> {
        if !root.exists() {
            return Ok(vec![]);
        }
        // Published paths are canonical; compare like with like
        let root = fs::canonicalize(root).map_err(|e| CleanupError::Io(root.to_path_buf(), e))?;

        let referenced: Vec<PathBuf> = [Slot::Current, Slot::Previous]
            .iter()
            .map(|slot| self.store.get(slot.path_key()))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(|p| canonical_reference(Path::new(&p)))
            .collect();
        debug!(root = %root.display(), ?referenced, "sweeping orphaned payload directories");

        let mut removed = Vec::new();
        let entries = fs::read_dir(&root).map_err(|e| CleanupError::Io(root.clone(), e))?;
        for entry in entries {
            let path = entry.map_err(|e| CleanupError::Io(root.clone(), e))?.path();

            let orphan = PayloadLayout::is_staging_dir(&path)
                || (self.layout.is_output_dir(&path)
                    && !referenced.iter().any(|r| r.starts_with(&path)));
            if !orphan {
                continue;
            }

            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(dir = %path.display(), "removed orphaned payload directory");
                    removed.push(path);
                }
                Err(e) => warn!(dir = %path.display(), error = %e, "could not remove orphan"),
            }
        }
        Ok(removed)
    }
}

/// Resolve symlinks and relative parts of a stored payload path. A payload
/// whose file is gone is resolved through its parent directory.
fn canonical_reference(payload: &Path) -> PathBuf {
    if let Ok(path) = fs::canonicalize(payload) {
        return path;
    }
    match (payload.parent(), payload.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| payload.to_path_buf()),
        _ => payload.to_path_buf(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("Failed to delete {0}: {1}")]
    Io(PathBuf, #[source] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::{MemoryStore, StateKey};
    use tempfile::tempdir;

    fn store_with(key: StateKey, path: &Path) -> MemoryStore {
        MemoryStore::with_entries([(key, path.to_string_lossy().to_string())])
    }

    #[test]
    fn test_output_directory_is_removed_whole() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("output_20250115_163531");
        fs::create_dir_all(output.join("drawable-hdpi")).unwrap();
        fs::write(output.join("drawable-hdpi/logo.png"), b"png").unwrap();
        let payload = output.join("index.android.bundle");
        fs::write(&payload, b"code").unwrap();

        let store = store_with(StateKey::Path, &payload);
        let layout = PayloadLayout::default();
        let cleanup = Cleanup::new(&store, &layout);

        assert!(cleanup.delete_payload(Slot::Current));
        assert!(!output.exists());
        assert!(dir.path().exists());
        assert_eq!(store.get(StateKey::Path).unwrap(), "");
    }

    #[test]
    fn test_shared_parent_keeps_siblings() {
        let dir = tempdir().unwrap();
        let payload = dir.path().join("index.android.bundle");
        let sibling = dir.path().join("settings.json");
        fs::write(&payload, b"code").unwrap();
        fs::write(&sibling, b"{}").unwrap();

        let store = store_with(StateKey::PreviousPath, &payload);
        let layout = PayloadLayout::default();
        let cleanup = Cleanup::new(&store, &layout);

        assert_eq!(
            cleanup.try_delete_payload(Slot::Previous).unwrap(),
            Removal::File(payload.clone())
        );
        assert!(!payload.exists());
        assert!(sibling.exists());
        assert_eq!(store.get(StateKey::PreviousPath).unwrap(), "");
    }

    #[test]
    fn test_missing_file_is_already_clean() {
        let dir = tempdir().unwrap();
        let payload = dir.path().join("output_20250115_163531/app.bundle");

        let store = store_with(StateKey::Path, &payload);
        let layout = PayloadLayout::default();
        let cleanup = Cleanup::new(&store, &layout);

        assert!(cleanup.delete_payload(Slot::Current));
        assert_eq!(store.get(StateKey::Path).unwrap(), "");
    }

    #[test]
    fn test_empty_slot_is_a_noop() {
        let store = MemoryStore::new();
        let layout = PayloadLayout::default();
        let cleanup = Cleanup::new(&store, &layout);

        assert_eq!(
            cleanup.try_delete_payload(Slot::Current).unwrap(),
            Removal::Nothing
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_delete_keeps_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir_all(&locked).unwrap();
        let payload = locked.join("app.bundle");
        fs::write(&payload, b"code").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let store = store_with(StateKey::Path, &payload);
        let layout = PayloadLayout::default();
        let cleanup = Cleanup::new(&store, &layout);
        let deleted = cleanup.delete_payload(Slot::Current);

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        // Running as root bypasses directory permissions
        if payload.exists() {
            assert!(!deleted);
            assert_eq!(
                store.get(StateKey::Path).unwrap(),
                payload.to_string_lossy()
            );
        }
    }

    #[test]
    fn test_sweep_keeps_referenced_directories() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let current = root.join("output_20250102_000000");
        let previous = root.join("output_20250101_000000");
        let orphan = root.join("output_20241231_000000");
        let staging = root.join(".extract-1234");
        let unrelated = root.join("topfolder");
        for d in [&current, &previous, &orphan, &staging, &unrelated] {
            fs::create_dir_all(d).unwrap();
        }

        let store = MemoryStore::with_entries([
            (
                StateKey::Path,
                current.join("app.bundle").to_string_lossy().to_string(),
            ),
            (
                StateKey::PreviousPath,
                previous.join("app.bundle").to_string_lossy().to_string(),
            ),
        ]);
        let layout = PayloadLayout::default();
        let cleanup = Cleanup::new(&store, &layout);

        let mut removed = cleanup.sweep_orphans(&root).unwrap();
        removed.sort();
        let mut expected = vec![staging.clone(), orphan.clone()];
        expected.sort();

        assert_eq!(removed, expected);
        assert!(current.exists());
        assert!(previous.exists());
        assert!(unrelated.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_through_symlinked_root_spares_live_payloads() {
        let real = tempdir().unwrap();
        let links = tempdir().unwrap();
        let real_root = fs::canonicalize(real.path()).unwrap();
        let link_root = links.path().join("payloads");
        std::os::unix::fs::symlink(&real_root, &link_root).unwrap();

        // Published paths are canonical, the sweep is handed the link
        let current = real_root.join("output_20250102_000000");
        let previous = real_root.join("output_20250101_000000");
        fs::create_dir_all(&current).unwrap();
        fs::create_dir_all(&previous).unwrap();
        fs::write(current.join("app.bundle"), b"B").unwrap();

        // The previous slot is stored through the link and its file is gone
        let store = MemoryStore::with_entries([
            (
                StateKey::Path,
                current.join("app.bundle").to_string_lossy().to_string(),
            ),
            (
                StateKey::PreviousPath,
                link_root
                    .join("output_20250101_000000/app.bundle")
                    .to_string_lossy()
                    .to_string(),
            ),
        ]);
        let layout = PayloadLayout::default();

        let removed = Cleanup::new(&store, &layout)
            .sweep_orphans(&link_root)
            .unwrap();

        assert!(removed.is_empty());
        assert!(current.join("app.bundle").exists());
        assert!(previous.exists());
    }

    #[test]
    fn test_sweep_with_non_canonical_root() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let current = root.join("output_20250102_000000");
        fs::create_dir_all(&current).unwrap();
        fs::write(current.join("app.bundle"), b"B").unwrap();

        let store = store_with(StateKey::Path, &current.join("app.bundle"));
        let layout = PayloadLayout::default();

        // `root/output_x/..` names the same directory without being canonical
        let indirect = current.join("..");
        let removed = Cleanup::new(&store, &layout)
            .sweep_orphans(&indirect)
            .unwrap();

        assert!(removed.is_empty());
        assert!(current.join("app.bundle").exists());
    }
}
