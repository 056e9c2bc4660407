//! otabundle - over-the-air script bundle lifecycle for mobile hosts
//!
//! Installs downloaded payload archives, picks the payload to load at
//! process start, and keeps one previous payload around for rollback.

pub mod engine;

pub use engine::{
    BundleEngine, BundleError, BundleRecord, EngineConfig, FallbackReason, InstallRequest,
    InstallStep, Resolution, Slot, StateKey, StateStore,
};
