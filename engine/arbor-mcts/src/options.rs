//! Engine options and per-search parameters.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced at construction for invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("num_search_threads must be positive")]
    NoSearchThreads,

    #[error("pondering requires at least 2 search threads")]
    PonderingNeedsThreads,

    #[error("batch_size_limit must be positive")]
    EmptyBatch,

    #[error("eval_cache_size must be positive")]
    EmptyCache,

    #[error("search summaries are enabled but profiling_dir is unset")]
    MissingProfilingDir,

    #[error("invalid root softmax temperature schedule '{0}'")]
    InvalidTemperature(String),

    #[error("options conflict with the shared evaluator service: {0}")]
    EvaluatorMismatch(String),
}

/// Static engine options: the full configuration surface of the search.
///
/// Two preset constructors mirror the two deployment modes: `competitive`
/// (no exploration noise, flat root temperature) and `training` (Dirichlet
/// noise, forced playouts, decaying root temperature).
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Number of search worker threads.
    pub num_search_threads: usize,

    /// Maximum positions per network-evaluation batch.
    pub batch_size_limit: usize,

    /// Keep searching while the opponent thinks. Requires ≥ 2 workers.
    pub enable_pondering: bool,

    /// Tree-size limit for pondering searches.
    pub pondering_tree_size_limit: u32,

    /// How long the evaluator waits for a batch to fill before flushing.
    pub eval_timeout: Duration,

    /// Evaluation LRU cache capacity, in entries.
    pub eval_cache_size: usize,

    /// Root softmax temperature schedule, `"start->end:rate"` with `b` bound
    /// to the game's branching factor, or a bare constant.
    pub root_softmax_temperature: String,

    /// PUCT exploration constant.
    pub cpuct: f32,

    /// First-play-urgency reduction constant.
    pub cfpu: f32,

    /// Dirichlet noise mixing fraction at the root (0 disables noise).
    pub dirichlet_mult: f32,

    /// Per-action Dirichlet alpha is `factor / sqrt(num_valid_actions)`.
    pub dirichlet_alpha_factor: f32,

    /// Guarantee forced visit floors for noised root children.
    pub forced_playouts: bool,

    /// Forced-playout scale: the floor is `sqrt(k_forced · P · ΣN)`.
    pub k_forced: f32,

    pub enable_first_play_urgency: bool,

    /// Steer selection away from children proven lost for the mover.
    pub avoid_proven_losers: bool,

    /// Concentrate reported counts on children proven won for the mover.
    pub exploit_proven_winners: bool,

    /// Evaluate each node under a randomly chosen board symmetry; when off,
    /// the game's canonical symmetry is used instead.
    pub apply_random_symmetries: bool,

    /// Append one summary line per completed search to a file under
    /// `profiling_dir`.
    pub enable_search_summaries: bool,

    pub profiling_dir: Option<PathBuf>,

    /// Seed for every RNG the engine owns. With one worker thread a fixed
    /// seed makes searches bit-reproducible.
    pub seed: Option<u64>,
}

impl SearchOptions {
    /// Competitive play: deterministic priors, flat root temperature.
    pub fn competitive() -> Self {
        Self {
            num_search_threads: 8,
            batch_size_limit: 16,
            enable_pondering: false,
            pondering_tree_size_limit: 4096,
            eval_timeout: Duration::from_micros(250),
            eval_cache_size: 1 << 16,
            root_softmax_temperature: "1".to_string(),
            cpuct: 1.1,
            cfpu: 0.2,
            dirichlet_mult: 0.0,
            dirichlet_alpha_factor: 1.75,
            forced_playouts: false,
            k_forced: 2.0,
            enable_first_play_urgency: true,
            avoid_proven_losers: true,
            exploit_proven_winners: true,
            apply_random_symmetries: true,
            enable_search_summaries: false,
            profiling_dir: None,
            seed: None,
        }
    }

    /// Training-data generation: root noise, forced playouts, decaying root
    /// temperature.
    pub fn training() -> Self {
        Self {
            dirichlet_mult: 0.25,
            forced_playouts: true,
            root_softmax_temperature: "1.4->1.1:2*sqrt(b)".to_string(),
            ..Self::competitive()
        }
    }

    /// Small, single-threaded, seeded configuration for tests.
    pub fn for_testing() -> Self {
        Self {
            num_search_threads: 1,
            batch_size_limit: 4,
            eval_cache_size: 1024,
            apply_random_symmetries: false,
            seed: Some(0),
            ..Self::competitive()
        }
    }

    pub fn with_threads(mut self, n: usize) -> Self {
        self.num_search_threads = n;
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size_limit = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_pondering(mut self, limit: u32) -> Self {
        self.enable_pondering = true;
        self.pondering_tree_size_limit = limit;
        self
    }

    /// Per-call parameters of a pondering search.
    pub fn pondering_params(&self) -> SearchParams {
        SearchParams {
            tree_size_limit: self.pondering_tree_size_limit,
            disable_exploration: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_search_threads == 0 {
            return Err(ConfigError::NoSearchThreads);
        }
        if self.enable_pondering && self.num_search_threads < 2 {
            return Err(ConfigError::PonderingNeedsThreads);
        }
        if self.batch_size_limit == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        if self.eval_cache_size == 0 {
            return Err(ConfigError::EmptyCache);
        }
        if self.enable_search_summaries && self.profiling_dir.is_none() {
            return Err(ConfigError::MissingProfilingDir);
        }
        Ok(())
    }
}

/// Per-call search parameters.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    /// The search runs until the root's total visit count exceeds this.
    pub tree_size_limit: u32,

    /// Suppress root Dirichlet noise and the root temperature adjustment.
    pub disable_exploration: bool,
}

impl SearchParams {
    pub fn new(tree_size_limit: u32) -> Self {
        Self {
            tree_size_limit,
            disable_exploration: false,
        }
    }

    pub fn deterministic(tree_size_limit: u32) -> Self {
        Self {
            tree_size_limit,
            disable_exploration: true,
        }
    }
}
