//! Core traits and types for the Arbor game-search engine
//!
//! This crate provides the fundamental abstractions shared by the search
//! engine and the game implementations:
//! - `Game`: the capability contract a game exposes to the engine (rules,
//!   symmetries, tensor encoding, fingerprints, IO hooks)
//! - `ActionMask`: fixed-capacity bit-set of actions, iterated in ascending
//!   action order
//! - `ValueVec`: per-player win-probability vector in `[0, 1]`
//! - `ActionOutcome`: the result of applying an action to a state

pub mod game;
pub mod mask;
pub mod value;

// Re-export main types for convenience
pub use game::{ActionOutcome, Game, SymmetryMask};
pub use mask::{ActionMask, MAX_ACTIONS};
pub use value::{Seat, ValueVec, NUM_PLAYERS};
