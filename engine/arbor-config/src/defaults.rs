//! Default configuration values.
//!
//! Single source of truth for every default the config surface exposes;
//! `structs.rs` routes serde defaults through these constants.

// Logging defaults
pub const LOG_LEVEL: &str = "info";

// Search defaults
pub const NUM_SEARCH_THREADS: usize = 8;
pub const BATCH_SIZE_LIMIT: usize = 16;
pub const ENABLE_PONDERING: bool = false;
pub const PONDERING_TREE_SIZE_LIMIT: u32 = 4096;
pub const EVAL_TIMEOUT_NS: u64 = 250_000;
pub const EVAL_CACHE_SIZE: usize = 1 << 16;
pub const ROOT_SOFTMAX_TEMPERATURE: &str = "1.4->1.1:2*sqrt(b)";
pub const CPUCT: f32 = 1.1;
pub const CFPU: f32 = 0.2;
pub const DIRICHLET_MULT: f32 = 0.25;
pub const DIRICHLET_ALPHA_FACTOR: f32 = 1.75;
pub const FORCED_PLAYOUTS: bool = true;
pub const K_FORCED: f32 = 2.0;
pub const ENABLE_FIRST_PLAY_URGENCY: bool = true;
pub const AVOID_PROVEN_LOSERS: bool = true;
pub const EXPLOIT_PROVEN_WINNERS: bool = true;
pub const APPLY_RANDOM_SYMMETRIES: bool = true;
pub const ENABLE_SEARCH_SUMMARIES: bool = false;
