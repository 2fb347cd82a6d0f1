//! Tree nodes and edges.
//!
//! A node's data falls into three groups with different write disciplines:
//!
//! * *Stable data* is written once at construction: the position, the acting
//!   seat, the valid-action mask, the symmetry index, the move number, and
//!   the terminal value when the position is decided.
//! * *Evaluation data* is written once on first expansion under the node's
//!   evaluation mutex, guarded by an `Unset -> Pending -> Set` state machine
//!   with a condition variable for threads that arrive while a network
//!   evaluation is in flight.
//! * *Stats* are updated continuously under the stats mutex: the sum of real
//!   leaf returns, real and virtual visit counts, and per-seat
//!   provably-winning / provably-losing bits.
//!
//! Edges live in their own arena as one contiguous run per node, created in
//! ascending action order at expansion time. An edge's child handle and visit
//! counter are atomics so readers can traverse without taking any lock; the
//! run itself becomes visible only through the node's `edges` word, which is
//! published after the run is fully initialized.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use arbor_core::{ActionMask, Game, Seat, ValueVec};

use crate::evaluator::Evaluation;
use std::sync::Arc;

/// Index into the node arena. Using a newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const NONE: NodeId = NodeId(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn is_some(self) -> bool {
        !self.is_none()
    }
}

/// A contiguous run of edges in the edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRun {
    pub start: u32,
    pub len: u16,
}

impl EdgeRun {
    pub fn indices(self) -> impl ExactSizeIterator<Item = u32> {
        self.start..self.start + self.len as u32
    }
}

/// One action out of a parent node.
///
/// `action` and `prior` are written during expansion, before the owning
/// node publishes its edge run; after publication only the atomics change.
/// The edge counter tracks *real* visits routed through this edge and may
/// trail the child's own count when the child is shared via a transposition.
#[derive(Debug)]
pub struct Edge {
    action: u16,
    local_index: u16,
    prior: f32,
    child: AtomicU32,
    count: AtomicU32,
}

impl Edge {
    pub fn new(action: u16, local_index: u16, prior: f32) -> Self {
        Self {
            action,
            local_index,
            prior,
            child: AtomicU32::new(NodeId::NONE.0),
            count: AtomicU32::new(0),
        }
    }

    pub fn action(&self) -> u16 {
        self.action
    }

    pub fn local_index(&self) -> u16 {
        self.local_index
    }

    pub fn prior(&self) -> f32 {
        self.prior
    }

    pub fn child(&self) -> NodeId {
        NodeId(self.child.load(Ordering::Acquire))
    }

    /// Link a lazily-created child. Loses benignly against a concurrent
    /// linker: the cache hands every racer the same node for the same
    /// position, so the stored value is identical either way.
    pub fn link_child(&self, child: NodeId) {
        let _ = self.child.compare_exchange(
            NodeId::NONE.0,
            child.0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn bump_count(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Rebind handles after arena compaction. Single-threaded by contract.
    pub fn remap_child(&mut self, child: NodeId) {
        *self.child.get_mut() = child.0;
    }

    /// Restore a visit counter on a rebuilt edge. Compaction-time only.
    pub fn set_count(&mut self, count: u32) {
        *self.count.get_mut() = count;
    }
}

/// Evaluation lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalState {
    Unset,
    Pending,
    Set,
}

/// Evaluation data, written once under the evaluation mutex.
#[derive(Debug)]
pub struct EvalData {
    pub state: EvalState,
    pub evaluation: Option<Arc<Evaluation>>,
    /// Normalized policy prior over the valid actions (ascending action
    /// order), after any root noise / root softmax temperature adjustment.
    pub prior: Box<[f32]>,
}

/// Continuously-updated statistics.
#[derive(Debug, Clone)]
pub struct NodeStats {
    /// Sum of real leaf returns propagated through this node.
    pub value_sum: ValueVec,
    pub real_count: u32,
    pub virtual_count: u32,
    /// Bit per seat: the position is a proven win for that seat.
    pub provably_winning: u8,
    /// Bit per seat: the position is a proven loss for that seat.
    pub provably_losing: u8,
}

impl NodeStats {
    fn new() -> Self {
        Self {
            value_sum: ValueVec::ZERO,
            real_count: 0,
            virtual_count: 0,
            provably_winning: 0,
            provably_losing: 0,
        }
    }

    pub fn total_count(&self) -> u32 {
        self.real_count + self.virtual_count
    }

    pub fn is_proven_winning(&self, seat: Seat) -> bool {
        self.provably_winning & (1 << seat) != 0
    }

    pub fn is_proven_losing(&self, seat: Seat) -> bool {
        self.provably_losing & (1 << seat) != 0
    }
}

/// Point-in-time child statistics consumed by PUCT selection.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub value: ValueVec,
    pub virtualized_value: ValueVec,
    pub real_count: u32,
    pub virtual_count: u32,
    pub provably_winning: u8,
    pub provably_losing: u8,
}

/// One game position reached during search.
pub struct Node<G: Game> {
    // Stable data (write-once).
    state: G::FullState,
    seat: Seat,
    valid: ActionMask,
    sym: u8,
    move_number: u32,
    terminal: Option<ValueVec>,

    /// Published edge run: 0 = none, else `(start + 1) << 16 | len`.
    edges: AtomicU64,

    eval: Mutex<EvalData>,
    eval_cv: Condvar,
    stats: Mutex<NodeStats>,
}

impl<G: Game> Node<G> {
    pub fn new(state: G::FullState, terminal: Option<ValueVec>, sym: u8) -> Self {
        let base = G::base_state(&state);
        let seat = G::current_seat(&base);
        let valid = if terminal.is_some() {
            ActionMask::EMPTY
        } else {
            G::legal_actions(&state)
        };
        let move_number = G::move_number(&state);

        let mut stats = NodeStats::new();
        if let Some(v) = terminal {
            // A decided position proves itself: winner's bit set, loser's
            // loss bit set. Draws prove neither.
            for p in 0..2u8 {
                if v.get(p) >= 1.0 {
                    stats.provably_winning |= 1 << p;
                    stats.provably_losing |= 1 << (1 - p);
                }
            }
        }

        Self {
            state,
            seat,
            valid,
            sym,
            move_number,
            terminal,
            edges: AtomicU64::new(0),
            eval: Mutex::new(EvalData {
                state: EvalState::Unset,
                evaluation: None,
                prior: Box::new([]),
            }),
            eval_cv: Condvar::new(),
            stats: Mutex::new(stats),
        }
    }

    pub fn state(&self) -> &G::FullState {
        &self.state
    }

    pub fn seat(&self) -> Seat {
        self.seat
    }

    pub fn valid_actions(&self) -> ActionMask {
        self.valid
    }

    pub fn sym(&self) -> u8 {
        self.sym
    }

    pub fn move_number(&self) -> u32 {
        self.move_number
    }

    pub fn terminal_value(&self) -> Option<ValueVec> {
        self.terminal
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    // -- edge run ---------------------------------------------------------

    pub fn edge_run(&self) -> Option<EdgeRun> {
        let word = self.edges.load(Ordering::Acquire);
        if word == 0 {
            None
        } else {
            Some(EdgeRun {
                start: (word >> 16) as u32 - 1,
                len: (word & 0xffff) as u16,
            })
        }
    }

    /// Publish the edge run. Called once, under the evaluation mutex, after
    /// every edge in the run is initialized.
    pub fn publish_edges(&self, run: EdgeRun) {
        debug_assert!(self.edge_run().is_none());
        let word = ((run.start as u64 + 1) << 16) | run.len as u64;
        self.edges.store(word, Ordering::Release);
    }

    /// Rebind the run after arena compaction. Single-threaded by contract.
    pub fn remap_edges(&mut self, run: Option<EdgeRun>) {
        let word = match run {
            Some(run) => ((run.start as u64 + 1) << 16) | run.len as u64,
            None => 0,
        };
        *self.edges.get_mut() = word;
    }

    // -- evaluation data --------------------------------------------------

    pub fn lock_eval(&self) -> MutexGuard<'_, EvalData> {
        self.eval.lock().unwrap()
    }

    pub fn eval_cv(&self) -> &Condvar {
        &self.eval_cv
    }

    /// The stored evaluation, if the node has reached `Set`.
    pub fn evaluation(&self) -> Option<Arc<Evaluation>> {
        let guard = self.eval.lock().unwrap();
        guard.evaluation.clone()
    }

    /// The node's normalized prior over valid actions (empty before `Set`).
    pub fn prior(&self) -> Box<[f32]> {
        let guard = self.eval.lock().unwrap();
        guard.prior.clone()
    }

    // -- stats ------------------------------------------------------------

    pub fn lock_stats(&self) -> MutexGuard<'_, NodeStats> {
        self.stats.lock().unwrap()
    }

    /// Mean of real leaf returns. Terminal nodes report their fixed outcome;
    /// an unvisited non-terminal reports zero.
    pub fn value_avg(&self) -> ValueVec {
        if let Some(v) = self.terminal {
            return v;
        }
        let stats = self.lock_stats();
        stats.value_sum.scaled_down(stats.real_count)
    }

    pub fn total_count(&self) -> u32 {
        self.lock_stats().total_count()
    }

    /// Consistent snapshot of everything PUCT needs, one lock acquisition.
    pub fn snapshot(&self) -> StatsSnapshot {
        let stats = self.lock_stats();
        let value = match self.terminal {
            Some(v) => v,
            None => stats.value_sum.scaled_down(stats.real_count),
        };
        let total = stats.total_count();
        let virtualized_value = if total == 0 {
            value
        } else if let Some(v) = self.terminal {
            v
        } else {
            (stats.value_sum + ValueVec::virtual_loss(self.seat) * stats.virtual_count as f32)
                .scaled_down(total)
        };
        StatsSnapshot {
            value,
            virtualized_value,
            real_count: stats.real_count,
            virtual_count: stats.virtual_count,
            provably_winning: stats.provably_winning,
            provably_losing: stats.provably_losing,
        }
    }

    /// VirtualIncrement: a thread is descending through this node toward a
    /// pending evaluation.
    pub fn virtual_increment(&self) {
        let mut stats = self.lock_stats();
        stats.virtual_count += 1;
    }

    /// Abandon a virtual visit without converting it (evaluation failed).
    pub fn virtual_cancel(&self) {
        let mut stats = self.lock_stats();
        debug_assert!(stats.virtual_count > 0);
        stats.virtual_count = stats.virtual_count.saturating_sub(1);
    }

    /// IncrementTransfer: convert one virtual visit into a real one carrying
    /// the measured leaf value.
    pub fn transfer_increment(&self, value: ValueVec) {
        let mut stats = self.lock_stats();
        debug_assert!(stats.virtual_count > 0);
        stats.virtual_count = stats.virtual_count.saturating_sub(1);
        stats.real_count += 1;
        stats.value_sum += value;
    }

    /// RealIncrement: a completed simulation passed through this node.
    pub fn real_increment(&self, value: ValueVec) {
        let mut stats = self.lock_stats();
        stats.real_count += 1;
        stats.value_sum += value;
    }

    /// Merge freshly derived proven-outcome bits. Returns true if anything
    /// changed (the caller keeps walking toward the root while true).
    pub fn merge_proven(&self, winning: u8, losing: u8) -> bool {
        let mut stats = self.lock_stats();
        let before = (stats.provably_winning, stats.provably_losing);
        stats.provably_winning |= winning;
        stats.provably_losing |= losing;
        (stats.provably_winning, stats.provably_losing) != before
    }

    pub fn proven_bits(&self) -> (u8, u8) {
        let stats = self.lock_stats();
        (stats.provably_winning, stats.provably_losing)
    }

    /// True when the acting seat's result here is proven either way; the
    /// visit loop stops early on a decided root.
    pub fn proven_decided(&self) -> bool {
        let stats = self.lock_stats();
        stats.is_proven_winning(self.seat) || stats.is_proven_losing(self.seat)
    }
}
