//! Bundle Engine
//!
//! The surface a host runtime binds to. Synchronous operations run inline;
//! installs are serialized through one lock and run on the blocking pool so
//! the caller's thread is never held up by archive I/O.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::cleanup::{Cleanup, CleanupError};
use super::config::EngineConfig;
use super::error::{BundleError, Result};
use super::extract::{ArchiveExtractor, ExtractOptions};
use super::host::{
    BuildIdProvider, DefaultBundleProvider, NoopRestarter, Restarter, StaticDefaultBundle,
};
use super::installer::{InstallRequest, Installer};
use super::layout::{is_readable_file, PayloadLayout};
use super::resolver::{Resolution, Resolver};
use super::rollback::RollbackManager;
use super::store::{BundleRecord, Slot, StateKey, StateStore};
use super::verify::ArchiveVerifier;

struct EngineInner {
    store: Arc<dyn StateStore>,
    build: Arc<dyn BuildIdProvider>,
    default_bundle: Arc<dyn DefaultBundleProvider>,
    restarter: Arc<dyn Restarter>,
    extractor: ArchiveExtractor,
    verifier: ArchiveVerifier,
}

impl EngineInner {
    fn install(&self, request: &InstallRequest) -> Result<bool> {
        Installer::new(
            self.store.as_ref(),
            self.build.as_ref(),
            &self.extractor,
            &self.verifier,
        )
        .install(request)
    }

    fn layout(&self) -> &PayloadLayout {
        self.extractor.layout()
    }
}

#[derive(Clone)]
pub struct BundleEngine {
    inner: Arc<EngineInner>,
    install_lock: Arc<Mutex<()>>,
}

impl BundleEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        build: Arc<dyn BuildIdProvider>,
        default_bundle: Arc<dyn DefaultBundleProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                build,
                default_bundle,
                restarter: Arc::new(NoopRestarter),
                extractor: ArchiveExtractor::default(),
                verifier: ArchiveVerifier::new(),
            }),
            install_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Build an engine from a config file's settings
    pub fn from_config(config: &EngineConfig, build: Arc<dyn BuildIdProvider>) -> Result<Self> {
        let store = config.open_store()?;
        let verifier = match &config.trusted_public_key {
            Some(key) => ArchiveVerifier::from_hex_key(key)?,
            None => ArchiveVerifier::new(),
        };
        let options = ExtractOptions {
            layout: PayloadLayout::new(config.output_prefix.clone()),
            stop_at_payload: config.stop_at_payload,
        };

        Ok(Self::new(
            store,
            build,
            Arc::new(StaticDefaultBundle(config.default_bundle.clone())),
        )
        .with_extract_options(options)
        .with_verifier(verifier))
    }

    pub fn with_extract_options(self, options: ExtractOptions) -> Self {
        self.map_inner(|inner| inner.extractor = ArchiveExtractor::new(options))
    }

    pub fn with_verifier(self, verifier: ArchiveVerifier) -> Self {
        self.map_inner(|inner| inner.verifier = verifier)
    }

    pub fn with_restarter(self, restarter: Arc<dyn Restarter>) -> Self {
        self.map_inner(|inner| inner.restarter = restarter)
    }

    fn map_inner(self, f: impl FnOnce(&mut EngineInner)) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => EngineInner {
                store: Arc::clone(&shared.store),
                build: Arc::clone(&shared.build),
                default_bundle: Arc::clone(&shared.default_bundle),
                restarter: Arc::clone(&shared.restarter),
                extractor: shared.extractor.clone(),
                verifier: shared.verifier.clone(),
            },
        };
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
            install_lock: self.install_lock,
        }
    }

    pub fn store(&self) -> &dyn StateStore {
        self.inner.store.as_ref()
    }

    /// Install an archive. Calls queue behind any install already running.
    ///
    /// The work holds the install lock until it finishes, even if this
    /// future is dropped first.
    pub async fn install_package(&self, request: InstallRequest) -> Result<bool> {
        let guard = Arc::clone(&self.install_lock).lock_owned().await;
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            inner.install(&request)
        })
        .await
        .map_err(|e| BundleError::InstallAborted(e.to_string()))?
    }

    /// Blocking form of [`Self::install_package`] for hosts without a
    /// runtime. Panics if called from inside an async context.
    pub fn install_blocking(&self, request: &InstallRequest) -> Result<bool> {
        let _guard = self.install_lock.blocking_lock();
        self.inner.install(request)
    }

    /// Callback form of [`Self::install_package`]. `on_done` runs exactly once.
    /// Must be called from within a tokio runtime.
    pub fn install_package_with<F>(&self, request: InstallRequest, on_done: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<bool>) + Send + 'static,
    {
        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.install_package(request).await;
            on_done(result);
        })
    }

    /// Choose the payload for this process start
    pub fn resolve(&self) -> Resolution {
        Resolver::new(
            self.inner.store.as_ref(),
            self.inner.build.as_ref(),
            self.inner.default_bundle.as_ref(),
        )
        .resolve()
    }

    /// Swap the previous payload back in. Waits for any running install.
    pub async fn rollback_to_previous(&self) -> bool {
        let _guard = self.install_lock.lock().await;
        RollbackManager::new(self.inner.store.as_ref(), self.inner.layout()).rollback_to_previous()
    }

    pub async fn delete_payload(&self, slot: Slot) -> bool {
        let _guard = self.install_lock.lock().await;
        Cleanup::new(self.inner.store.as_ref(), self.inner.layout()).delete_payload(slot)
    }

    /// Delete both slots' payloads and reset both version labels. Waits
    /// for any running install.
    pub async fn delete_current_and_previous(&self) -> bool {
        let _guard = self.install_lock.lock().await;
        let cleanup = Cleanup::new(self.inner.store.as_ref(), self.inner.layout());

        let mut deleted = true;
        for slot in [Slot::Current, Slot::Previous] {
            deleted &= cleanup.delete_payload(slot);
            if let Err(e) = self.inner.store.clear(slot.version_key()) {
                warn!(%slot, error = %e, "could not reset version");
                deleted = false;
            }
        }
        deleted
    }

    /// Remove staging and unreferenced output directories under `root`.
    /// Waits for any running install.
    pub async fn sweep_orphans(&self, root: &Path) -> std::result::Result<Vec<PathBuf>, CleanupError> {
        let _guard = self.install_lock.lock().await;
        Cleanup::new(self.inner.store.as_ref(), self.inner.layout()).sweep_orphans(root)
    }

    pub fn restart_process(&self) -> std::io::Result<()> {
        self.inner.restarter.restart()
    }

    /// Stored version label, `"0"` when none is set
    pub fn get_current_version(&self) -> Result<String> {
        let version = self.inner.store.get(StateKey::Version)?;
        Ok(if version.is_empty() {
            "0".to_string()
        } else {
            version
        })
    }

    /// Store a new version label, keeping a differing old one as the
    /// previous version
    pub fn set_current_version(&self, version: &str) -> Result<bool> {
        let store = self.inner.store.as_ref();
        let current = store.get(StateKey::Version)?;
        if !current.is_empty() && current != version {
            store.put(StateKey::PreviousVersion, &current)?;
        }
        store.put(StateKey::Version, version)?;
        info!(version, previous = %current, "current version set");
        Ok(true)
    }

    pub fn get_metadata(&self) -> Result<Option<String>> {
        let metadata = self.inner.store.get(StateKey::Metadata)?;
        Ok(Some(metadata).filter(|m| !m.is_empty()))
    }

    pub fn set_metadata(&self, metadata: &str) -> Result<bool> {
        self.inner.store.put(StateKey::Metadata, metadata)?;
        Ok(true)
    }

    /// Point the current slot at an existing file without extracting
    /// anything. `false` when the file does not exist.
    pub async fn set_exact_path(&self, path: &Path) -> Result<bool> {
        if !is_readable_file(path) {
            warn!(path = %path.display(), "set_exact_path: not an existing file");
            return Ok(false);
        }
        let Some(path_str) = path.to_str() else {
            warn!(path = %path.display(), "set_exact_path: path is not valid UTF-8");
            return Ok(false);
        };

        let _guard = self.install_lock.lock().await;
        let store = self.inner.store.as_ref();
        store.put(StateKey::Path, path_str)?;
        store.put(StateKey::VersionCode, &self.inner.build.build_id())?;
        info!(path = %path_str, "payload path set directly");
        Ok(true)
    }

    pub fn status(&self) -> Result<BundleRecord> {
        Ok(BundleRecord::load(self.inner.store.as_ref())?)
    }
}
