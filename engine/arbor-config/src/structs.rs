//! Configuration struct definitions.
//!
//! All config structs with serde deserialization support and default values.

use std::path::PathBuf;
use std::time::Duration;

use arbor_mcts::SearchOptions;
use serde::Deserialize;

use crate::defaults;

// ============================================================================
// Serde default functions (required for #[serde(default = "...")])
// ============================================================================

fn d_log_level() -> String {
    defaults::LOG_LEVEL.into()
}
fn d_threads() -> usize {
    defaults::NUM_SEARCH_THREADS
}
fn d_batch() -> usize {
    defaults::BATCH_SIZE_LIMIT
}
fn d_pondering() -> bool {
    defaults::ENABLE_PONDERING
}
fn d_ponder_limit() -> u32 {
    defaults::PONDERING_TREE_SIZE_LIMIT
}
fn d_eval_timeout_ns() -> u64 {
    defaults::EVAL_TIMEOUT_NS
}
fn d_eval_cache() -> usize {
    defaults::EVAL_CACHE_SIZE
}
fn d_root_temp() -> String {
    defaults::ROOT_SOFTMAX_TEMPERATURE.into()
}
fn d_cpuct() -> f32 {
    defaults::CPUCT
}
fn d_cfpu() -> f32 {
    defaults::CFPU
}
fn d_dirichlet_mult() -> f32 {
    defaults::DIRICHLET_MULT
}
fn d_dirichlet_alpha() -> f32 {
    defaults::DIRICHLET_ALPHA_FACTOR
}
fn d_forced_playouts() -> bool {
    defaults::FORCED_PLAYOUTS
}
fn d_k_forced() -> f32 {
    defaults::K_FORCED
}
fn d_fpu() -> bool {
    defaults::ENABLE_FIRST_PLAY_URGENCY
}
fn d_avoid_losers() -> bool {
    defaults::AVOID_PROVEN_LOSERS
}
fn d_exploit_winners() -> bool {
    defaults::EXPLOIT_PROVEN_WINNERS
}
fn d_random_syms() -> bool {
    defaults::APPLY_RANDOM_SYMMETRIES
}
fn d_summaries() -> bool {
    defaults::ENABLE_SEARCH_SUMMARIES
}

/// Top-level configuration, usually loaded from `arbor.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CentralConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

/// Logging section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "d_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: d_log_level(),
        }
    }
}

/// Search section: the engine's full knob surface.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "d_threads")]
    pub num_search_threads: usize,

    #[serde(default = "d_batch")]
    pub batch_size_limit: usize,

    #[serde(default = "d_pondering")]
    pub enable_pondering: bool,

    #[serde(default = "d_ponder_limit")]
    pub pondering_tree_size_limit: u32,

    #[serde(default = "d_eval_timeout_ns")]
    pub eval_timeout_ns: u64,

    #[serde(default = "d_eval_cache")]
    pub eval_cache_size: usize,

    #[serde(default = "d_root_temp")]
    pub root_softmax_temperature: String,

    #[serde(default = "d_cpuct")]
    pub cpuct: f32,

    #[serde(default = "d_cfpu")]
    pub cfpu: f32,

    #[serde(default = "d_dirichlet_mult")]
    pub dirichlet_mult: f32,

    #[serde(default = "d_dirichlet_alpha")]
    pub dirichlet_alpha_factor: f32,

    #[serde(default = "d_forced_playouts")]
    pub forced_playouts: bool,

    #[serde(default = "d_k_forced")]
    pub k_forced: f32,

    #[serde(default = "d_fpu")]
    pub enable_first_play_urgency: bool,

    #[serde(default = "d_avoid_losers")]
    pub avoid_proven_losers: bool,

    #[serde(default = "d_exploit_winners")]
    pub exploit_proven_winners: bool,

    #[serde(default = "d_random_syms")]
    pub apply_random_symmetries: bool,

    #[serde(default = "d_summaries")]
    pub enable_search_summaries: bool,

    #[serde(default)]
    pub profiling_dir: Option<PathBuf>,

    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            num_search_threads: d_threads(),
            batch_size_limit: d_batch(),
            enable_pondering: d_pondering(),
            pondering_tree_size_limit: d_ponder_limit(),
            eval_timeout_ns: d_eval_timeout_ns(),
            eval_cache_size: d_eval_cache(),
            root_softmax_temperature: d_root_temp(),
            cpuct: d_cpuct(),
            cfpu: d_cfpu(),
            dirichlet_mult: d_dirichlet_mult(),
            dirichlet_alpha_factor: d_dirichlet_alpha(),
            forced_playouts: d_forced_playouts(),
            k_forced: d_k_forced(),
            enable_first_play_urgency: d_fpu(),
            avoid_proven_losers: d_avoid_losers(),
            exploit_proven_winners: d_exploit_winners(),
            apply_random_symmetries: d_random_syms(),
            enable_search_summaries: d_summaries(),
            profiling_dir: None,
            seed: None,
        }
    }
}

impl SearchConfig {
    /// Materialize engine options. Validation stays with the engine
    /// (`SearchOptions::validate` runs at manager construction).
    pub fn to_search_options(&self) -> SearchOptions {
        SearchOptions {
            num_search_threads: self.num_search_threads,
            batch_size_limit: self.batch_size_limit,
            enable_pondering: self.enable_pondering,
            pondering_tree_size_limit: self.pondering_tree_size_limit,
            eval_timeout: Duration::from_nanos(self.eval_timeout_ns),
            eval_cache_size: self.eval_cache_size,
            root_softmax_temperature: self.root_softmax_temperature.clone(),
            cpuct: self.cpuct,
            cfpu: self.cfpu,
            dirichlet_mult: self.dirichlet_mult,
            dirichlet_alpha_factor: self.dirichlet_alpha_factor,
            forced_playouts: self.forced_playouts,
            k_forced: self.k_forced,
            enable_first_play_urgency: self.enable_first_play_urgency,
            avoid_proven_losers: self.avoid_proven_losers,
            exploit_proven_winners: self.exploit_proven_winners,
            apply_random_symmetries: self.apply_random_symmetries,
            enable_search_summaries: self.enable_search_summaries,
            profiling_dir: self.profiling_dir.clone(),
            seed: self.seed,
        }
    }
}
