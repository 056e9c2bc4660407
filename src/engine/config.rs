//! otabundle Configuration Module
//! Handles loading and validating otabundle.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::installer::DEFAULT_EXTENSION;
use super::layout::DEFAULT_OUTPUT_PREFIX;
use super::store::{JsonFileStore, SqliteStore, StateStore, StoreError};

pub const CONFIG_FILE: &str = "otabundle.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Could not determine a data directory")]
    NoDataDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding state and payloads
    pub base_dir: PathBuf,
    #[serde(default = "default_store")]
    pub store: StoreBackend,
    /// Payload reference returned for the `default` slot
    #[serde(default = "default_bundle")]
    pub default_bundle: String,
    /// Host build identifier, for hosts that cannot supply one at runtime
    #[serde(default)]
    pub build_id: Option<String>,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    #[serde(default = "default_true")]
    pub stop_at_payload: bool,
    /// Hex ED25519 key; when set every install must be signed
    #[serde(default)]
    pub trusted_public_key: Option<String>,
    /// Command the bootstrapper runs with the resolved payload appended
    #[serde(default)]
    pub runtime_command: Option<Vec<String>>,
}

fn default_store() -> StoreBackend {
    StoreBackend::Json
}

fn default_bundle() -> String {
    "assets://index.android.bundle".to_string()
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

fn default_output_prefix() -> String {
    DEFAULT_OUTPUT_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

impl EngineConfig {
    pub fn load(base_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = base_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let mut config: EngineConfig = serde_json::from_str(&content)?;
        if config.base_dir.as_os_str().is_empty() {
            config.base_dir = base_dir.to_path_buf();
        }
        Ok(config)
    }

    /// Load the config in `base_dir`, or fall back to defaults when there is
    /// none
    pub fn load_or_default(base_dir: &Path) -> Result<Self, ConfigError> {
        match Self::load(base_dir) {
            Err(ConfigError::NotFound(_)) => Ok(Self::default_for_dir(base_dir)),
            other => other,
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.base_dir)?;
        let config_path = self.base_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_for_dir(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            store: default_store(),
            default_bundle: default_bundle(),
            build_id: None,
            extension: default_extension(),
            output_prefix: default_output_prefix(),
            stop_at_payload: true,
            trusted_public_key: None,
            runtime_command: None,
        }
    }

    /// Platform data directory for otabundle
    ///
    /// Linux: ~/.local/share/otabundle/
    /// Windows: %LOCALAPPDATA%\otabundle\
    /// macOS: ~/Library/Application Support/otabundle/
    pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
        #[cfg(target_os = "windows")]
        let dir = dirs::data_local_dir();

        #[cfg(not(target_os = "windows"))]
        let dir = dirs::data_dir();

        dir.map(|d| d.join("otabundle")).ok_or(ConfigError::NoDataDir)
    }

    /// Where archives are dropped before install; payload directories are
    /// created next to them
    pub fn payload_root(&self) -> PathBuf {
        self.base_dir.join("payloads")
    }

    pub fn state_path(&self) -> PathBuf {
        match self.store {
            StoreBackend::Json => self.base_dir.join("state.json"),
            StoreBackend::Sqlite => self.base_dir.join("state.db"),
        }
    }

    pub fn open_store(&self) -> Result<Arc<dyn StateStore>, StoreError> {
        let store: Arc<dyn StateStore> = match self.store {
            StoreBackend::Json => Arc::new(JsonFileStore::open(&self.state_path())?),
            StoreBackend::Sqlite => Arc::new(SqliteStore::open(&self.state_path())?),
        };
        Ok(store)
    }
}
