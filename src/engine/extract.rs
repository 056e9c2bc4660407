//! Archive Extractor
//!
//! Unpacks a payload archive next to itself and moves the payload file into
//! a freshly named output directory.
//!
//! ## Algorithm
//! 1. Stream entries into a `.extract-<uuid>` staging directory, keeping the
//!    archive's relative structure.
//! 2. Remember the first top-level folder seen.
//! 3. The first written file whose path ends with the target extension is
//!    the payload. With `stop_at_payload` the scan ends there.
//! 4. Rename the top-level folder to a unique output directory, or create one
//!    when the archive had no folder, and make sure the payload sits directly
//!    inside it.
//! 5. Check the payload is readable and return its absolute path.
//!
//! Entry order is whatever order the archive stores entries in. On failure
//! the staging directory is left in place; `Cleanup::sweep_orphans` removes
//! it later.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::error::{BundleError, Result};
use super::layout::{is_readable_file, PayloadLayout};

/// Supported archive containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the container from its magic bytes
    pub fn detect(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| BundleError::ArchiveInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut magic = [0u8; 4];
        let read = file
            .read(&mut magic)
            .map_err(|e| BundleError::ArchiveInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        match &magic[..read] {
            [b'P', b'K', 0x03, 0x04] | [b'P', b'K', 0x05, 0x06] => Ok(Self::Zip),
            [0x1f, 0x8b, ..] => Ok(Self::TarGz),
            _ => Err(BundleError::ArchiveInvalid {
                path: path.to_path_buf(),
                reason: "unrecognized archive format".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub layout: PayloadLayout,
    /// Stop streaming entries once the payload has been written
    pub stop_at_payload: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            layout: PayloadLayout::default(),
            stop_at_payload: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    options: ExtractOptions,
}

impl ArchiveExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    pub fn layout(&self) -> &PayloadLayout {
        &self.options.layout
    }

    /// Extract `archive` and return the absolute path of the payload file
    pub fn extract(&self, archive: &Path, extension: &str) -> Result<PathBuf> {
        let archive = fs::canonicalize(archive).map_err(|e| BundleError::ArchiveInvalid {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })?;
        let root = archive
            .parent()
            .ok_or_else(|| BundleError::ArchiveInvalid {
                path: archive.clone(),
                reason: "archive has no parent directory".to_string(),
            })?
            .to_path_buf();
        let format = ArchiveFormat::detect(&archive)?;
        let size = fs::metadata(&archive).map(|m| m.len()).unwrap_or(0);

        info!(archive = %archive.display(), ?format, size, extension, "extracting archive");

        let staging = self.options.layout.staging_dir(&root);
        fs::create_dir_all(&staging).map_err(|e| BundleError::denied(&staging, e))?;

        let mut scan = EntryScan::new(&staging, extension, self.options.stop_at_payload);
        match format {
            ArchiveFormat::Zip => scan.stream_zip(&archive)?,
            ArchiveFormat::TarGz => scan.stream_tar_gz(&archive)?,
        }

        debug!(entries = scan.written, top_level = ?scan.top_level, payload = ?scan.payload, "archive streamed");

        let payload = scan.payload.ok_or_else(|| BundleError::TargetNotFound {
            archive: archive.clone(),
            extension: extension.to_string(),
        })?;

        let output_dir = self.options.layout.unique_output_dir(&root);
        let extracted_top = scan
            .top_level
            .map(|name| staging.join(name))
            .filter(|dir| dir.is_dir());

        let payload = match extracted_top {
            Some(top) => {
                info!(from = %top.display(), to = %output_dir.display(), "renaming top-level folder");
                fs::rename(&top, &output_dir).map_err(|e| BundleError::denied(&top, e))?;

                let relocated = payload
                    .strip_prefix(&top)
                    .ok()
                    .map(|relative| output_dir.join(relative));
                relocated.unwrap_or(payload)
            }
            None => {
                info!(dir = %output_dir.display(), "no top-level folder, creating output directory");
                fs::create_dir_all(&output_dir)
                    .map_err(|e| BundleError::denied(&output_dir, e))?;
                payload
            }
        };

        let payload = move_into(&payload, &output_dir)?;

        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!(staging = %staging.display(), error = %e, "could not remove staging directory");
        }

        if !is_readable_file(&payload) {
            return Err(BundleError::TargetNotFound {
                archive,
                extension: extension.to_string(),
            });
        }

        info!(payload = %payload.display(), "archive extracted");
        Ok(payload)
    }
}

/// Ensure `file` sits directly inside `dir`, moving it there if needed.
/// Cleanup recognizes a payload by its parent directory's name.
fn move_into(file: &Path, dir: &Path) -> Result<PathBuf> {
    if file.parent() == Some(dir) {
        return Ok(file.to_path_buf());
    }

    let name = file
        .file_name()
        .ok_or_else(|| BundleError::ExtractionFailed(format!("payload path has no file name: {}", file.display())))?;
    let target = dir.join(name);

    debug!(from = %file.display(), to = %target.display(), "moving payload into output directory");
    fs::rename(file, &target).map_err(|e| BundleError::denied(file, e))?;
    Ok(target)
}

/// Reduce an entry name to a relative path that cannot leave the staging
/// directory. `None` for names that try to.
fn sanitize_entry_path(name: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Per-extraction streaming state
struct EntryScan<'a> {
    staging: &'a Path,
    extension: &'a str,
    stop_at_payload: bool,
    top_level: Option<PathBuf>,
    payload: Option<PathBuf>,
    written: usize,
}

impl<'a> EntryScan<'a> {
    fn new(staging: &'a Path, extension: &'a str, stop_at_payload: bool) -> Self {
        Self {
            staging,
            extension,
            stop_at_payload,
            top_level: None,
            payload: None,
            written: 0,
        }
    }

    fn done(&self) -> bool {
        self.stop_at_payload && self.payload.is_some()
    }

    fn stream_zip(&mut self, archive: &Path) -> Result<()> {
        let file = File::open(archive).map_err(|e| BundleError::ArchiveInvalid {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| BundleError::ExtractionFailed(format!("cannot read zip: {}", e)))?;

        debug!(entries = zip.len(), "zip archive opened");

        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .map_err(|e| BundleError::ExtractionFailed(format!("zip entry {}: {}", index, e)))?;
            let name = PathBuf::from(entry.name());
            let is_dir = entry.is_dir();
            self.accept(&name, is_dir, &mut entry)?;
            if self.done() {
                break;
            }
        }
        Ok(())
    }

    fn stream_tar_gz(&mut self, archive: &Path) -> Result<()> {
        let file = File::open(archive).map_err(|e| BundleError::ArchiveInvalid {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        let entries = tar
            .entries()
            .map_err(|e| BundleError::ExtractionFailed(format!("cannot read tar: {}", e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| BundleError::ExtractionFailed(format!("tar entry: {}", e)))?;
            let entry_type = entry.header().entry_type();
            if !(entry_type.is_file() || entry_type.is_dir()) {
                debug!(?entry_type, "skipping non-regular tar entry");
                continue;
            }
            let name = entry
                .path()
                .map_err(|e| BundleError::ExtractionFailed(format!("tar entry path: {}", e)))?
                .into_owned();
            self.accept(&name, entry_type.is_dir(), &mut entry)?;
            if self.done() {
                break;
            }
        }
        Ok(())
    }

    fn accept(&mut self, name: &Path, is_dir: bool, reader: &mut dyn Read) -> Result<()> {
        // "./" style entries carry nothing to write
        if name.components().all(|c| matches!(c, Component::CurDir)) {
            return Ok(());
        }
        let relative = sanitize_entry_path(name).ok_or_else(|| {
            BundleError::ExtractionFailed(format!("unsafe entry path: {}", name.display()))
        })?;

        if self.top_level.is_none() {
            let mut components = relative.components();
            let first = components.next();
            if is_dir || components.next().is_some() {
                if let Some(first) = first {
                    let folder = PathBuf::from(first.as_os_str());
                    debug!(folder = %folder.display(), "top-level folder detected");
                    self.top_level = Some(folder);
                }
            }
        }

        let out_path = self.staging.join(&relative);
        if is_dir {
            fs::create_dir_all(&out_path).map_err(|e| BundleError::denied(&out_path, e))?;
            return Ok(());
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BundleError::denied(parent, e))?;
        }
        let mut output = File::create(&out_path).map_err(|e| BundleError::denied(&out_path, e))?;
        io::copy(reader, &mut output).map_err(|e| {
            BundleError::ExtractionFailed(format!("writing {}: {}", out_path.display(), e))
        })?;
        self.written += 1;

        if self.payload.is_none() && out_path.to_string_lossy().ends_with(self.extension) {
            info!(payload = %out_path.display(), "payload entry found");
            self.payload = Some(out_path);
        }
        Ok(())
    }
}
