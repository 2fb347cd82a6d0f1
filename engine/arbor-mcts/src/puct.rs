//! PUCT child selection.
//!
//! `PuctStats` gathers one consistent row per edge (prior, virtualized value,
//! counts, proven bits), locking each child's stats exactly once and never
//! holding two node locks at a time. The score is
//!
//! ```text
//! PUCT(c) = 2·V(c) + cPUCT · P(c) · sqrt(ΣN + ε) / (1 + N(c))
//! ```
//!
//! with `V` in `[0, 1]` (the 2× factor keeps `cPUCT` on the conventional
//! `[-1, 1]` scale). First-play urgency substitutes a reduced parent value
//! for unvisited children; forced playouts grant noised root children a
//! visit floor; proven outcomes steer selection when the corresponding
//! options are on. Exact ties break toward the lowest action index.

use arbor_core::{Game, Seat};

use crate::node::{Edge, Node};
use crate::options::SearchOptions;
use crate::pool::Arena;

/// Epsilon under the square root; prevents 0/0 at an unvisited root.
pub const PUCT_EPS: f32 = 1e-6;

/// Bonus used to force a playout; dwarfs any natural PUCT value.
const FORCED_BONUS: f32 = 1e6;

/// Per-edge statistics rows for one selection or pruning pass.
#[derive(Debug)]
pub struct PuctStats {
    pub seat: Seat,
    pub actions: Vec<u16>,
    /// Policy prior per edge.
    pub p: Vec<f32>,
    /// Virtualized value per edge, from the acting seat's perspective.
    pub v: Vec<f32>,
    /// Total (real + virtual) count per edge's child.
    pub n: Vec<f32>,
    /// Virtual count per edge's child.
    pub vn: Vec<f32>,
    pub proven_winning: Vec<bool>,
    pub proven_losing: Vec<bool>,
    /// Base PUCT score per edge (no forced-playout or proven adjustments).
    pub puct: Vec<f32>,
}

impl PuctStats {
    /// Gather rows for every edge of `node`.
    ///
    /// `suppress_fpu` disables the first-play-urgency reduction (used at a
    /// noised root, where unvisited children should stay attractive).
    pub fn gather<G: Game>(
        nodes: &Arena<Node<G>>,
        edges: &Arena<Edge>,
        node: &Node<G>,
        options: &SearchOptions,
        suppress_fpu: bool,
    ) -> Self {
        let seat = node.seat();
        let run = node.edge_run().expect("PUCT over an unexpanded node");
        let len = run.len as usize;

        let mut stats = Self {
            seat,
            actions: Vec::with_capacity(len),
            p: Vec::with_capacity(len),
            v: vec![0.0; len],
            n: vec![0.0; len],
            vn: vec![0.0; len],
            proven_winning: vec![false; len],
            proven_losing: vec![false; len],
            puct: vec![0.0; len],
        };

        let mut unvisited = Vec::new();
        for (i, eid) in run.indices().enumerate() {
            let edge = edges.get(eid);
            stats.actions.push(edge.action());
            stats.p.push(edge.prior());

            let child_id = edge.child();
            if child_id.is_some() {
                let snap = nodes.get(child_id.0).snapshot();
                let total = snap.real_count + snap.virtual_count;
                stats.v[i] = snap.virtualized_value.get(seat);
                stats.n[i] = total as f32;
                stats.vn[i] = snap.virtual_count as f32;
                stats.proven_winning[i] = snap.provably_winning & (1 << seat) != 0;
                stats.proven_losing[i] = snap.provably_losing & (1 << seat) != 0;
                if total == 0 {
                    unvisited.push(i);
                }
            } else {
                unvisited.push(i);
            }
        }

        if options.enable_first_play_urgency && !unvisited.is_empty() {
            let parent_value = node.value_avg().get(seat);
            let cfpu = if suppress_fpu { 0.0 } else { options.cfpu };
            let visited_prior_mass: f32 = (0..len)
                .filter(|&i| stats.n[i] > 0.0)
                .map(|i| stats.p[i])
                .sum();
            let fpu_value = parent_value - cfpu * visited_prior_mass.sqrt();
            for &i in &unvisited {
                stats.v[i] = fpu_value;
            }
        }

        let n_sum: f32 = stats.n.iter().sum();
        let sqrt_sum = (n_sum + PUCT_EPS).sqrt();
        for i in 0..len {
            stats.puct[i] =
                2.0 * stats.v[i] + options.cpuct * stats.p[i] * sqrt_sum / (1.0 + stats.n[i]);
        }

        stats
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn n_sum(&self) -> f32 {
        self.n.iter().sum()
    }

    /// Any virtual losses among the children (instrumentation).
    pub fn virtual_loss_influenced(&self) -> bool {
        self.vn.iter().any(|&v| v > 0.0)
    }

    /// The forced-playout visit floor per edge: `sqrt(k_forced · P · ΣN)`.
    pub fn forced_floor(&self, k_forced: f32) -> Vec<f32> {
        let n_sum = self.n_sum();
        self.p
            .iter()
            .map(|&p| (k_forced * p * n_sum).sqrt())
            .collect()
    }

    /// Pick the edge a search thread should traverse.
    ///
    /// `root_noise_active` turns on forced playouts (when configured) and is
    /// only true at a noised root.
    pub fn select(&self, options: &SearchOptions, root_noise_active: bool) -> Option<usize> {
        if self.is_empty() {
            return None;
        }

        let mut adjusted = self.puct.clone();

        if options.forced_playouts && root_noise_active {
            let floors = self.forced_floor(options.k_forced);
            for i in 0..adjusted.len() {
                if self.n[i] > 0.0 && self.n[i] < floors[i] {
                    adjusted[i] = FORCED_BONUS;
                }
            }
        }

        if options.exploit_proven_winners && self.proven_winning.iter().any(|&w| w) {
            for i in 0..adjusted.len() {
                if !self.proven_winning[i] {
                    adjusted[i] = f32::NEG_INFINITY;
                }
            }
        } else if options.avoid_proven_losers
            && self.proven_losing.iter().any(|&l| l)
            && !self.proven_losing.iter().all(|&l| l)
        {
            for i in 0..adjusted.len() {
                if self.proven_losing[i] {
                    adjusted[i] = f32::NEG_INFINITY;
                }
            }
        }

        // Strict > keeps the lowest action index on exact ties (edges are in
        // ascending action order).
        let mut best = 0;
        for i in 1..adjusted.len() {
            if adjusted[i] > adjusted[best] {
                best = i;
            }
        }
        Some(best)
    }
}
