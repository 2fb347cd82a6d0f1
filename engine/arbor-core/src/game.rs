//! The `Game` capability contract.
//!
//! The search engine is generic over a game type and touches game semantics
//! only through this trait: rules, board symmetries, the tensor encoding fed
//! to the network evaluator, position fingerprints for transposition lookup,
//! and text IO for logs and result rendering.
//!
//! Implementations live in their own crates (`games-tictactoe`,
//! `games-connect4`, `games-othello`) and must be cheap to clone: the engine
//! clones `FullState` once per created tree node.

use std::hash::Hash;

use crate::mask::ActionMask;
use crate::value::{Seat, ValueVec};

/// Result of applying an action (or of inspecting a state directly).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionOutcome {
    /// The game continues.
    Continue,
    /// The game ended with the given per-player outcome.
    Terminal(ValueVec),
}

impl ActionOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionOutcome::Terminal(_))
    }

    pub fn terminal_value(&self) -> Option<ValueVec> {
        match self {
            ActionOutcome::Terminal(v) => Some(*v),
            ActionOutcome::Continue => None,
        }
    }
}

/// Bit-set of symmetry indices available at a position (bit `i` set means
/// symmetry `i` maps the position to a position with identical semantics).
pub type SymmetryMask = u32;

/// Capability contract for a two-player, perfect-information, zero-sum game.
///
/// # State types
///
/// * [`Game::FullState`] carries everything the rules need (move counters,
///   pass counters, cached winner bits). It is what tree nodes store.
/// * [`Game::BaseState`] is the history-less snapshot consumed by the tensor
///   encoding and fingerprinting; it must be derivable from a full state.
///
/// # Symmetry conventions
///
/// Symmetry index 0 must be the identity. For every symmetry `s`,
/// [`Game::inverse_symmetry`] returns `s⁻¹` such that transforming by `s`
/// and then by `s⁻¹` is the identity, and the three transform hooks commute:
/// transforming a state and reading a policy off it is equivalent to reading
/// the policy off the original state and transforming the policy.
pub trait Game: Send + Sync + 'static {
    /// Short lowercase identifier, used in logs and summary file names.
    const NAME: &'static str;

    /// Size of the global action space (policy vectors have this length).
    const NUM_ACTIONS: usize;

    /// Upper bound on the number of legal actions at any position.
    const MAX_BRANCHING: usize;

    /// Order of the symmetry group (tic-tac-toe and othello: 8, connect4: 2).
    const NUM_SYMMETRIES: usize;

    /// Number of `f32`s in one tensorized input slot.
    const INPUT_LEN: usize;

    /// Rule-complete game state; one is stored per tree node.
    type FullState: Clone + Send + Sync + 'static;

    /// History-less snapshot used for evaluation input and fingerprints.
    type BaseState: Clone + Send + Sync + 'static;

    /// Hashable, equality-comparable position fingerprint. Within one move
    /// number, key equality must imply the positions are interchangeable for
    /// search purposes.
    type Key: Clone + Eq + Hash + Send + Sync + 'static;

    /// Project a full state down to its base snapshot.
    fn base_state(full: &Self::FullState) -> Self::BaseState;

    /// The set of legal actions. Empty exactly when the position is terminal.
    fn legal_actions(full: &Self::FullState) -> ActionMask;

    /// Whose turn it is.
    fn current_seat(base: &Self::BaseState) -> Seat;

    /// Apply `action` in place and report whether the game ended.
    ///
    /// `action` must be legal; implementations may debug-assert but are not
    /// required to validate.
    fn apply(full: &mut Self::FullState, action: u16) -> ActionOutcome;

    /// Terminality of the state as it stands (no action applied). Used when a
    /// position arrives from outside the engine rather than through
    /// [`Game::apply`].
    fn outcome(full: &Self::FullState) -> ActionOutcome;

    /// Number of plies played so far. Keys the per-move node cache.
    fn move_number(full: &Self::FullState) -> u32;

    /// Symmetries available at this position.
    fn symmetries(full: &Self::FullState) -> SymmetryMask;

    /// The symmetry mapping this position to its canonical representative.
    fn canonical_symmetry(base: &Self::BaseState) -> u8;

    /// Group inverse of a symmetry index.
    fn inverse_symmetry(sym: u8) -> u8;

    /// Transform a base state in place.
    fn transform_state(base: &mut Self::BaseState, sym: u8);

    /// Transform a global policy vector (`NUM_ACTIONS` entries) in place.
    fn transform_policy(policy: &mut [f32], sym: u8);

    /// Transform a single action index.
    fn transform_action(action: u16, sym: u8) -> u16;

    /// Write the network input for `base` into `out` (`INPUT_LEN` entries).
    fn tensorize(base: &Self::BaseState, out: &mut [f32]);

    /// Position fingerprint.
    fn key(base: &Self::BaseState) -> Self::Key;

    /// Human-readable action name for logs and result tables.
    fn action_to_str(action: u16) -> String;

    /// Multi-line board rendering for logs and human UIs.
    fn render(base: &Self::BaseState) -> String;
}
