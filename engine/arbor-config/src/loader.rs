//! Configuration loading logic.
//!
//! Handles loading config from files and applying environment variable
//! overrides.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::CentralConfig;

/// Standard locations to search for arbor.toml
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "arbor.toml",    // Current directory
    "../arbor.toml", // Parent directory (when running from a subdirectory)
];

/// Load the central configuration.
///
/// Searches in the following order:
/// 1. Path specified by the ARBOR_CONFIG environment variable
/// 2. Current directory (arbor.toml)
/// 3. Parent directory (../arbor.toml)
///
/// After loading, environment variable overrides are applied. A missing or
/// malformed file degrades to the built-in defaults with a warning.
pub fn load_config() -> CentralConfig {
    if let Ok(path) = std::env::var("ARBOR_CONFIG") {
        let path = PathBuf::from(&path);
        if path.exists() {
            info!("Loading config from ARBOR_CONFIG: {}", path.display());
            return load_from_path(&path);
        }
        warn!(
            "ARBOR_CONFIG={} not found, searching defaults",
            path.display()
        );
    }

    for path_str in CONFIG_SEARCH_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading config from {}", path.display());
            return load_from_path(&path);
        }
    }

    debug!("No arbor.toml found, using built-in defaults");
    apply_env_overrides(CentralConfig::default())
}

/// Load configuration from a specific path.
pub fn load_from_path(path: &Path) -> CentralConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => apply_env_overrides(config),
            Err(e) => {
                warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                apply_env_overrides(CentralConfig::default())
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}, using defaults", path.display(), e);
            apply_env_overrides(CentralConfig::default())
        }
    }
}

/// Macro to reduce env override boilerplate
macro_rules! env_override {
    // String field
    ($config:expr, $section:ident . $field:ident, $key:expr) => {
        if let Ok(v) = std::env::var($key) {
            $config.$section.$field = v;
        }
    };
    // Parseable field (usize, u64, f32, bool, ...)
    ($config:expr, $section:ident . $field:ident, $key:expr, parse) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$section.$field = v;
        }
    };
    // Optional parseable field
    ($config:expr, $section:ident . $field:ident, $key:expr, optional_parse) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$section.$field = Some(v);
        }
    };
}

/// Apply `ARBOR_*` environment variable overrides on top of a loaded config.
pub fn apply_env_overrides(mut config: CentralConfig) -> CentralConfig {
    env_override!(config, logging.level, "ARBOR_LOG_LEVEL");

    env_override!(config, search.num_search_threads, "ARBOR_NUM_SEARCH_THREADS", parse);
    env_override!(config, search.batch_size_limit, "ARBOR_BATCH_SIZE_LIMIT", parse);
    env_override!(config, search.enable_pondering, "ARBOR_ENABLE_PONDERING", parse);
    env_override!(
        config,
        search.pondering_tree_size_limit,
        "ARBOR_PONDERING_TREE_SIZE_LIMIT",
        parse
    );
    env_override!(config, search.eval_timeout_ns, "ARBOR_EVAL_TIMEOUT_NS", parse);
    env_override!(config, search.eval_cache_size, "ARBOR_EVAL_CACHE_SIZE", parse);
    env_override!(
        config,
        search.root_softmax_temperature,
        "ARBOR_ROOT_SOFTMAX_TEMP"
    );
    env_override!(config, search.cpuct, "ARBOR_CPUCT", parse);
    env_override!(config, search.cfpu, "ARBOR_CFPU", parse);
    env_override!(config, search.dirichlet_mult, "ARBOR_DIRICHLET_MULT", parse);
    env_override!(
        config,
        search.dirichlet_alpha_factor,
        "ARBOR_DIRICHLET_ALPHA_FACTOR",
        parse
    );
    env_override!(config, search.forced_playouts, "ARBOR_FORCED_PLAYOUTS", parse);
    env_override!(config, search.k_forced, "ARBOR_K_FORCED", parse);
    env_override!(config, search.seed, "ARBOR_SEED", optional_parse);

    config
}
