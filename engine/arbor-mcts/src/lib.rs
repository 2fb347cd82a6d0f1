//! Parallel Monte-Carlo Tree Search for two-player zero-sum board games
//!
//! The engine drives decision-making for perfect-information games behind
//! the `arbor_core::Game` contract. Worker threads expand a shared tree with
//! PUCT selection and virtual-loss bookkeeping; leaf positions are evaluated
//! through a batching [`service::EvaluatorService`] backed by a policy+value
//! network (or a uniform stand-in). The same [`manager::SearchManager`] is
//! reused for competitive play, training-data generation, and pondering
//! while the opponent thinks.
//!
//! Component map:
//! - [`pool`]: arena storage for nodes and edges, background release hooks,
//!   mark-compact defragmentation
//! - [`node`]: the node/edge data model and the per-node update operations
//! - [`cache`]: the per-move-number transposition table
//! - [`evaluator`] / [`service`]: the evaluator contract and the batched
//!   evaluation service with its LRU cache
//! - [`puct`]: child selection
//! - [`search`]: the per-thread simulation loop and backpropagation
//! - [`manager`]: root lifecycle, worker orchestration, results
//! - [`release`]: off-thread subtree destruction
//! - [`options`] / [`schedule`]: the configuration surface

pub mod cache;
pub mod evaluator;
pub mod lru;
pub mod manager;
pub mod node;
pub mod options;
pub mod pool;
pub mod puct;
pub mod release;
pub mod results;
pub mod schedule;
pub mod search;
pub mod service;
pub mod shared;

pub use evaluator::{BatchOutput, Evaluation, Evaluator, EvaluatorError, InputBatch, UniformEvaluator};
pub use manager::{InstanceIds, SearchManager};
pub use options::{ConfigError, SearchOptions, SearchParams};
pub use results::SearchResults;
pub use search::SearchError;
pub use service::EvaluatorService;
