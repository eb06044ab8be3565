//! # Enrich Registry
//!
//! The hot-swappable enrichment set ([`Registry`] / [`EnrichmentRegistry`]),
//! the periodic asset refresh loop ([`AssetManager`]), and the pause/resume
//! latch that coordinates them with the pipeline ([`PauseGate`]) — §4.3-4.5.

mod asset_manager;
mod pause_gate;
mod registry;

pub use asset_manager::{asset_local_path, AssetFetcher, AssetManager, AssetState, HttpAssetFetcher, RegistryBuilder};
pub use pause_gate::{PauseGate, PauseGateReader};
pub use registry::{EnrichmentRegistry, Registry, RegistrySnapshot};
