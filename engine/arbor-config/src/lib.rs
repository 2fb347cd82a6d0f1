//! Central configuration for the Arbor engine
//!
//! One TOML file (`arbor.toml`) configures logging and the full search knob
//! surface; `ARBOR_*` environment variables override individual fields.
//! Values deserialize into [`CentralConfig`] and convert into the engine's
//! validated `SearchOptions` via [`SearchConfig::to_search_options`].

pub mod defaults;
pub mod loader;
pub mod structs;

pub use loader::{apply_env_overrides, load_config, load_from_path};
pub use structs::{CentralConfig, LoggingConfig, SearchConfig};
