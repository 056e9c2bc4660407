// otabundle Engine - Core module structure
pub mod bridge;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod host;
pub mod installer;
pub mod layout;
pub mod resolver;
pub mod rollback;
pub mod store;
pub mod verify;

pub use bridge::BundleEngine;
pub use config::EngineConfig;
pub use error::{BundleError, InstallStep};
pub use installer::InstallRequest;
pub use resolver::{FallbackReason, Resolution};
pub use store::{BundleRecord, Slot, StateKey, StateStore};
