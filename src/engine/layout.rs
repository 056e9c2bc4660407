//! Payload Layout
//!
//! Naming rules for the on-disk payload layout. Every successful install
//! owns exactly one `<prefix><YYYYmmdd_HHMMSS>` directory; extraction stages
//! into `.extract-<uuid>` directories next to the archive first.

use chrono::Local;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DEFAULT_OUTPUT_PREFIX: &str = "output_";
pub const STAGING_PREFIX: &str = ".extract-";

#[derive(Debug, Clone)]
pub struct PayloadLayout {
    output_prefix: String,
}

impl Default for PayloadLayout {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_PREFIX)
    }
}

impl PayloadLayout {
    pub fn new(output_prefix: impl Into<String>) -> Self {
        Self {
            output_prefix: output_prefix.into(),
        }
    }

    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }

    /// A fresh output directory path under `root`. Not created.
    ///
    /// Two installs within the same second get `_1`, `_2`, ... suffixes.
    pub fn unique_output_dir(&self, root: &Path) -> PathBuf {
        let base = format!(
            "{}{}",
            self.output_prefix,
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let mut candidate = root.join(&base);
        let mut n = 1u32;
        while candidate.exists() {
            candidate = root.join(format!("{}_{}", base, n));
            n += 1;
        }
        candidate
    }

    /// A fresh staging directory path under `root`. Not created.
    pub fn staging_dir(&self, root: &Path) -> PathBuf {
        root.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()))
    }

    /// Whether a directory name was produced by [`Self::unique_output_dir`]
    pub fn is_output_dir_name(&self, name: &str) -> bool {
        let Some(rest) = name.strip_prefix(self.output_prefix.as_str()) else {
            return false;
        };
        let mut parts = rest.split('_');
        let date_ok = parts
            .next()
            .is_some_and(|d| d.len() == 8 && d.bytes().all(|b| b.is_ascii_digit()));
        let time_ok = parts
            .next()
            .is_some_and(|t| t.len() == 6 && t.bytes().all(|b| b.is_ascii_digit()));
        let suffix_ok = match parts.next() {
            None => true,
            Some(n) => !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()),
        };
        date_ok && time_ok && suffix_ok && parts.next().is_none()
    }

    pub fn is_output_dir(&self, dir: &Path) -> bool {
        dir.is_dir()
            && dir
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| self.is_output_dir_name(n))
    }

    pub fn is_staging_dir(dir: &Path) -> bool {
        dir.is_dir()
            && dir
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(STAGING_PREFIX))
    }

    /// List output directories directly under `root`, oldest first
    pub fn list_output_dirs(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        if !root.exists() {
            return Ok(vec![]);
        }

        let mut dirs = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if self.is_output_dir(&path) {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

/// The file exists, is a regular file and can be opened for reading
pub fn is_readable_file(path: &Path) -> bool {
    path.is_file() && File::open(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_output_dir_name_recognition() {
        let layout = PayloadLayout::default();
        assert!(layout.is_output_dir_name("output_20250115_163531"));
        assert!(layout.is_output_dir_name("output_20250115_163531_2"));

        assert!(!layout.is_output_dir_name("output_"));
        assert!(!layout.is_output_dir_name("output_2025_163531"));
        assert!(!layout.is_output_dir_name("output_20250115_163531_"));
        assert!(!layout.is_output_dir_name("output_20250115_163531_2_3"));
        assert!(!layout.is_output_dir_name("files"));
        assert!(!layout.is_output_dir_name("topfolder"));
    }

    #[test]
    fn test_custom_prefix() {
        let layout = PayloadLayout::new("hotfix-");
        assert!(layout.is_output_dir_name("hotfix-20250115_163531"));
        assert!(!layout.is_output_dir_name("output_20250115_163531"));
    }

    #[test]
    fn test_unique_output_dir_avoids_collisions() {
        let dir = tempdir().unwrap();
        let layout = PayloadLayout::default();

        let first = layout.unique_output_dir(dir.path());
        fs::create_dir_all(&first).unwrap();
        let second = layout.unique_output_dir(dir.path());

        assert_ne!(first, second);
        let name = second.file_name().unwrap().to_str().unwrap();
        assert!(layout.is_output_dir_name(name));
    }

    #[test]
    fn test_list_output_dirs_skips_other_entries() {
        let dir = tempdir().unwrap();
        let layout = PayloadLayout::default();

        fs::create_dir_all(dir.path().join("output_20240101_000000")).unwrap();
        fs::create_dir_all(dir.path().join("output_20230101_000000")).unwrap();
        fs::create_dir_all(dir.path().join(".extract-abc")).unwrap();
        fs::write(dir.path().join("output_20220101_000000"), b"file").unwrap();

        let dirs = layout.list_output_dirs(dir.path()).unwrap();
        let names: Vec<_> = dirs
            .iter()
            .map(|d| d.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["output_20230101_000000", "output_20240101_000000"]);
    }

    #[test]
    fn test_is_readable_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("app.bundle");
        fs::write(&file, b"code").unwrap();

        assert!(is_readable_file(&file));
        assert!(!is_readable_file(dir.path()));
        assert!(!is_readable_file(&dir.path().join("missing.bundle")));
    }
}
