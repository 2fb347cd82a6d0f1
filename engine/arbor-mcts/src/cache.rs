//! Per-move-number node cache: the search's transposition table.
//!
//! A two-level map under one coarse mutex: move number → position
//! fingerprint → node handle. The outer level makes root advance cheap:
//! `clear_before` detaches every sub-table of strictly earlier moves in one
//! sweep and hands the evicted population to the release service.
//!
//! Hash collisions are harmless by construction: the inner map compares full
//! keys, so fingerprint equality (not hash equality) is what merges
//! transpositions.

use std::sync::Mutex;

use arbor_core::{Game, ValueVec};
use rustc_hash::FxHashMap;

use crate::node::{Node, NodeId};
use crate::pool::Arena;

pub struct NodeCache<G: Game> {
    inner: Mutex<FxHashMap<u32, FxHashMap<G::Key, NodeId>>>,
}

impl<G: Game> NodeCache<G> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FxHashMap::default()),
        }
    }

    /// Look up the node for `state` at its move number, creating it in the
    /// arena if absent. Returns the handle and whether a node was created.
    ///
    /// Holding the table mutex across creation is what makes concurrent
    /// fetchers of the same position converge on a single node.
    pub fn fetch_or_create(
        &self,
        nodes: &Arena<Node<G>>,
        state: G::FullState,
        terminal: Option<ValueVec>,
        sym: u8,
    ) -> (NodeId, bool) {
        let move_number = G::move_number(&state);
        let key = G::key(&G::base_state(&state));

        let mut inner = self.inner.lock().unwrap();
        let sub = inner.entry(move_number).or_default();
        if let Some(&id) = sub.get(&key) {
            return (id, false);
        }
        let id = NodeId(nodes.alloc(Node::new(state, terminal, sym)));
        sub.insert(key, id);
        (id, true)
    }

    /// Erase everything. Returns the evicted handles for release.
    pub fn clear(&self) -> Vec<NodeId> {
        let mut inner = self.inner.lock().unwrap();
        let mut evicted = Vec::new();
        for (_, sub) in inner.drain() {
            evicted.extend(sub.into_values());
        }
        evicted
    }

    /// Erase every entry with move number strictly below `move_number`.
    /// Returns the evicted handles for release.
    pub fn clear_before(&self, move_number: u32) -> Vec<NodeId> {
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<u32> = inner
            .keys()
            .copied()
            .filter(|&m| m < move_number)
            .collect();
        let mut evicted = Vec::new();
        for m in stale {
            if let Some(sub) = inner.remove(&m) {
                evicted.extend(sub.into_values());
            }
        }
        evicted
    }

    /// Number of cached nodes across all move numbers.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().values().map(|sub| sub.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite handles after arena compaction: entries whose node survived
    /// are remapped, the rest are dropped. Single-threaded by contract.
    pub fn retain_remap(&mut self, mut remap: impl FnMut(NodeId) -> Option<NodeId>) {
        let inner = self.inner.get_mut().unwrap();
        inner.retain(|_, sub| {
            sub.retain(|_, id| match remap(*id) {
                Some(new_id) => {
                    *id = new_id;
                    true
                }
                None => false,
            });
            !sub.is_empty()
        });
    }
}

impl<G: Game> Default for NodeCache<G> {
    fn default() -> Self {
        Self::new()
    }
}
