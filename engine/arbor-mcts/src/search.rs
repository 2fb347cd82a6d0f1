//! Search worker threads.
//!
//! Each worker runs one simulation at a time: descend from the root by PUCT,
//! evaluate the leaf through the shared evaluator service, expand it, and
//! back-propagate along the explicit path stack recorded during descent.
//! Virtual losses mark the path while an evaluation is in flight and are
//! converted (not merely removed) when the real value arrives.
//!
//! Workers suspend only inside the evaluator service and on a node's
//! evaluation condition variable; node mutexes are never held across either.

use std::sync::Arc;

use arbor_core::{ActionOutcome, Game, ValueVec};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tracing::trace;

use crate::evaluator::{Evaluation, EvaluatorError};
use crate::node::{Edge, EdgeRun, EvalState, Node, NodeId};
use crate::options::SearchParams;
use crate::shared::SearchShared;

/// Errors that can occur during a search.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("evaluator error: {0}")]
    Evaluator(#[from] EvaluatorError),

    #[error("search integrity error: {0}")]
    Integrity(String),

    #[error("search worker panicked")]
    WorkerPanicked,
}

/// Parameters fixed for one worker launch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunParams {
    pub root: NodeId,
    pub tree_size_limit: u32,
    pub disable_exploration: bool,
    pub root_temperature: f32,
    pub seed: u64,
}

impl RunParams {
    pub(crate) fn new(root: NodeId, params: &SearchParams, root_temperature: f32, seed: u64) -> Self {
        Self {
            root,
            tree_size_limit: params.tree_size_limit,
            disable_exploration: params.disable_exploration,
            root_temperature,
            seed,
        }
    }
}

struct PathStep {
    node: NodeId,
    /// Arena id of the edge traversed into `node` (`None` at the root).
    edge: Option<u32>,
}

/// One search worker. Created per launch; consumed by [`SearchThread::run`].
pub(crate) struct SearchThread<G: Game> {
    shared: Arc<SearchShared<G>>,
    run: RunParams,
    thread_id: usize,
    rng: ChaCha20Rng,
    path: Vec<PathStep>,
}

impl<G: Game> SearchThread<G> {
    pub(crate) fn new(shared: Arc<SearchShared<G>>, run: RunParams, thread_id: usize) -> Self {
        let rng = ChaCha20Rng::seed_from_u64(run.seed ^ (thread_id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            shared,
            run,
            thread_id,
            rng,
            path: Vec::with_capacity(64),
        }
    }

    /// Simulate until the root has enough visits or the search is stopped.
    pub(crate) fn run(mut self) {
        trace!(thread_id = self.thread_id, "search worker started");
        while self.needs_more_visits() {
            self.path.clear();
            self.path.push(PathStep {
                node: self.run.root,
                edge: None,
            });
            if let Err(err) = self.visit(self.run.root, 0) {
                self.shared.record_error(err);
                self.shared.deactivate();
                break;
            }
        }
        trace!(thread_id = self.thread_id, "search worker finished");
    }

    /// The visit loop keeps going while the search is active, the root is
    /// undecided, and the tree is below its size limit. Stale reads are
    /// harmless here: they only cause a few extra visits.
    fn needs_more_visits(&self) -> bool {
        if !self.shared.search_active() {
            return false;
        }
        let root = self.shared.node(self.run.root);
        if root.is_terminal() {
            return false;
        }
        let options = &self.shared.options;
        if (options.exploit_proven_winners || options.avoid_proven_losers)
            && root.proven_decided()
        {
            return false;
        }
        root.total_count() <= self.run.tree_size_limit
    }

    fn visit(&mut self, node_id: NodeId, depth: u32) -> Result<(), SearchError> {
        let shared = Arc::clone(&self.shared);
        let node = shared.node(node_id);

        if let Some(terminal) = node.terminal_value() {
            self.backprop_terminal(terminal);
            self.propagate_proven();
            return Ok(());
        }

        if !shared.search_active() {
            return Ok(()); // unwind without updating
        }

        let Some((evaluation, expanded)) = self.evaluate_and_expand(node_id)? else {
            return Ok(()); // cancelled mid-evaluation
        };

        if expanded {
            // This thread produced the evaluation and already virtual-backprop'd.
            self.backprop_transfer(evaluation.value);
            return Ok(());
        }

        // Interior node: select and descend.
        let noised_root = self.noise_active(node_id);
        let stats = crate::puct::PuctStats::gather(
            &shared.nodes,
            &shared.edges,
            node,
            &shared.options,
            noised_root,
        );
        if let Some(service) = &shared.service {
            service.record_puct_calc(stats.virtual_loss_influenced());
        }
        let Some(best) = stats.select(&shared.options, noised_root) else {
            return Err(SearchError::Integrity(format!(
                "no selectable child at depth {depth}"
            )));
        };

        let run = node.edge_run().ok_or_else(|| {
            SearchError::Integrity("expanded node lost its edges".to_string())
        })?;
        let edge_id = run.start + best as u32;
        let edge = shared.edges.get(edge_id);
        let child_id = self.resolve_child(node, edge);

        // Short-circuit: the child has been visited through another parent;
        // catch this edge up by one without re-walking the subtree.
        let child = shared.node(child_id);
        if edge.count() < child.lock_stats().real_count {
            edge.bump_count();
            let value = child.value_avg();
            self.backprop_real(value);
            self.propagate_proven();
            return Ok(());
        }

        self.path.push(PathStep {
            node: child_id,
            edge: Some(edge_id),
        });
        self.visit(child_id, depth + 1)
    }

    /// Root noise applies only at the root of an exploring search.
    fn noise_active(&self, node_id: NodeId) -> bool {
        node_id == self.run.root
            && !self.run.disable_exploration
            && self.shared.options.dirichlet_mult > 0.0
    }

    /// Drive a node's evaluation state machine.
    ///
    /// Returns the evaluation and whether this thread performed the
    /// expansion; `None` means the search was cancelled while waiting.
    fn evaluate_and_expand(
        &mut self,
        node_id: NodeId,
    ) -> Result<Option<(Arc<Evaluation>, bool)>, SearchError> {
        let shared = Arc::clone(&self.shared);
        let node = shared.node(node_id);

        {
            let mut guard = node.lock_eval();
            loop {
                match guard.state {
                    EvalState::Set => {
                        let evaluation = guard.evaluation.clone().ok_or_else(|| {
                            SearchError::Integrity("evaluation marked set but absent".to_string())
                        })?;
                        return Ok(Some((evaluation, false)));
                    }
                    EvalState::Pending => {
                        if !shared.search_active() {
                            return Ok(None);
                        }
                        guard = node.eval_cv().wait(guard).unwrap();
                    }
                    EvalState::Unset => {
                        guard.state = EvalState::Pending;
                        break;
                    }
                }
            }
        }

        // Mark the whole path with virtual losses before the potentially
        // long blocking evaluation.
        self.backprop_virtual();

        let outcome = match &shared.service {
            Some(service) => service.evaluate(node, self.thread_id),
            None => Ok((
                Arc::new(Evaluation::uniform(node.valid_actions().count())),
                false,
            )),
        };

        let evaluation = match outcome {
            Ok((evaluation, _used_cache)) => evaluation,
            Err(err) => {
                // Roll the state machine and the virtual losses back so the
                // tree stays consistent for whoever inspects it post-mortem.
                self.backprop_virtual_cancel();
                {
                    let mut guard = node.lock_eval();
                    guard.state = EvalState::Unset;
                }
                node.eval_cv().notify_all();
                return Err(SearchError::Evaluator(err));
            }
        };

        let mut prior = evaluation.local_policy();
        if node_id == self.run.root && !self.run.disable_exploration {
            self.apply_dirichlet_noise(&mut prior);
            apply_temperature(&mut prior, self.run.root_temperature);
        }

        {
            let mut guard = node.lock_eval();
            let valid = node.valid_actions();
            let start = shared.edges.alloc_run(
                valid
                    .iter()
                    .enumerate()
                    .map(|(i, action)| Edge::new(action, i as u16, prior[i])),
            );
            node.publish_edges(EdgeRun {
                start,
                len: valid.count() as u16,
            });
            guard.prior = prior;
            guard.evaluation = Some(Arc::clone(&evaluation));
            guard.state = EvalState::Set;
        }
        node.eval_cv().notify_all();

        Ok(Some((evaluation, true)))
    }

    /// Find or lazily create the child behind an edge. The cache merges
    /// concurrent creators of the same position, so a lost link race still
    /// converges on one child.
    fn resolve_child(&mut self, node: &Node<G>, edge: &Edge) -> NodeId {
        let existing = edge.child();
        if existing.is_some() {
            return existing;
        }

        let mut state = node.state().clone();
        let outcome = G::apply(&mut state, edge.action());
        let terminal = match outcome {
            ActionOutcome::Terminal(v) => Some(v),
            ActionOutcome::Continue => None,
        };
        let sym = self.choose_symmetry(&state);
        let (child, created) = self
            .shared
            .cache
            .fetch_or_create(&self.shared.nodes, state, terminal, sym);
        if created {
            trace!(thread_id = self.thread_id, child = child.0, "created node");
        }
        edge.link_child(child);
        edge.child()
    }

    fn choose_symmetry(&mut self, state: &G::FullState) -> u8 {
        if !self.shared.options.apply_random_symmetries {
            return G::canonical_symmetry(&G::base_state(state));
        }
        let mask = G::symmetries(state);
        let count = mask.count_ones();
        if count <= 1 {
            return 0;
        }
        let pick = self.rng.gen_range(0..count);
        let mut seen = 0;
        for sym in 0..32u8 {
            if mask & (1 << sym) != 0 {
                if seen == pick {
                    return sym;
                }
                seen += 1;
            }
        }
        0
    }

    /// Mix root Dirichlet noise into the prior, alpha scaled down with the
    /// branching factor.
    fn apply_dirichlet_noise(&mut self, prior: &mut [f32]) {
        use rand_distr::{Distribution, Gamma};

        let options = &self.shared.options;
        if prior.is_empty() || options.dirichlet_mult <= 0.0 {
            return;
        }
        let alpha = options.dirichlet_alpha_factor / (prior.len() as f32).sqrt();
        let Ok(gamma) = Gamma::new(alpha as f64, 1.0) else {
            return;
        };
        let mut noise: Vec<f32> = (0..prior.len())
            .map(|_| gamma.sample(&mut self.rng) as f32)
            .collect();
        let sum: f32 = noise.iter().sum();
        if !(sum.is_finite() && sum > 0.0) {
            return;
        }
        for n in &mut noise {
            *n /= sum;
        }
        let mult = options.dirichlet_mult;
        for (p, n) in prior.iter_mut().zip(noise.iter()) {
            *p = (1.0 - mult) * *p + mult * n;
        }
    }

    // -- backpropagation variants ----------------------------------------

    /// VirtualIncrement along the whole path, leaf to root.
    fn backprop_virtual(&self) {
        for step in self.path.iter().rev() {
            self.shared.node(step.node).virtual_increment();
        }
    }

    /// Abandon the virtual marks after a failed evaluation.
    fn backprop_virtual_cancel(&self) {
        for step in self.path.iter().rev() {
            self.shared.node(step.node).virtual_cancel();
        }
    }

    /// IncrementTransfer along the whole path: each virtual visit becomes a
    /// real one carrying the leaf value, and each traversed edge's counter
    /// catches up.
    fn backprop_transfer(&self, value: ValueVec) {
        for step in self.path.iter().rev() {
            self.shared.node(step.node).transfer_increment(value);
            if let Some(edge_id) = step.edge {
                self.shared.edges.get(edge_id).bump_count();
            }
        }
    }

    /// RealIncrement along the whole path (short-circuit backprop).
    fn backprop_real(&self, value: ValueVec) {
        for step in self.path.iter().rev() {
            self.shared.node(step.node).real_increment(value);
            if let Some(edge_id) = step.edge {
                self.shared.edges.get(edge_id).bump_count();
            }
        }
    }

    /// Terminal outcome: update each ancestor exactly once. The terminal
    /// node's own stats stay fixed (its value is intrinsic), but its inbound
    /// edge still counts the traversal.
    fn backprop_terminal(&self, value: ValueVec) {
        let Some((leaf, ancestors)) = self.path.split_last() else {
            return;
        };
        if let Some(edge_id) = leaf.edge {
            self.shared.edges.get(edge_id).bump_count();
        }
        for step in ancestors.iter().rev() {
            self.shared.node(step.node).real_increment(value);
            if let Some(edge_id) = step.edge {
                self.shared.edges.get(edge_id).bump_count();
            }
        }
    }

    /// Re-derive proven-outcome bits bottom-up along the path. Stops as soon
    /// as a node's bits stop changing; two-player zero-sum, so a proven win
    /// for the mover is a proven loss for the opponent (draws prove
    /// nothing).
    fn propagate_proven(&self) {
        for step in self.path.iter().rev() {
            let node = self.shared.node(step.node);
            if node.is_terminal() {
                continue;
            }
            let Some(run) = node.edge_run() else {
                break;
            };
            let seat = node.seat();
            let mut any_winning = false;
            let mut all_losing = true;
            for edge_id in run.indices() {
                let child = self.shared.edges.get(edge_id).child();
                if child.is_none() {
                    all_losing = false;
                    continue;
                }
                let (winning, losing) = self.shared.node(child).proven_bits();
                if winning & (1 << seat) != 0 {
                    any_winning = true;
                }
                if losing & (1 << seat) == 0 {
                    all_losing = false;
                }
            }

            let mut winning_bits = 0u8;
            let mut losing_bits = 0u8;
            if any_winning {
                winning_bits |= 1 << seat;
                losing_bits |= 1 << (1 - seat);
            }
            if all_losing {
                losing_bits |= 1 << seat;
                winning_bits |= 1 << (1 - seat);
            }
            if winning_bits == 0 && losing_bits == 0 {
                break;
            }
            if !node.merge_proven(winning_bits, losing_bits) {
                break;
            }
        }
    }
}

/// Raise a distribution to `1/temperature` and renormalize; `1.0` and
/// degenerate temperatures leave it untouched.
fn apply_temperature(prior: &mut [f32], temperature: f32) {
    if prior.is_empty() || !temperature.is_finite() || temperature <= 0.0 {
        return;
    }
    if (temperature - 1.0).abs() < 1e-6 {
        return;
    }
    let inv = 1.0 / temperature;
    let mut sum = 0.0f32;
    for p in prior.iter_mut() {
        *p = p.max(0.0).powf(inv);
        sum += *p;
    }
    if sum.is_finite() && sum > 0.0 {
        for p in prior.iter_mut() {
            *p /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_temperature_identity() {
        let mut p = vec![0.5, 0.3, 0.2];
        let orig = p.clone();
        apply_temperature(&mut p, 1.0);
        assert_eq!(p, orig);
    }

    #[test]
    fn test_apply_temperature_sharpens_and_flattens() {
        let mut sharp = vec![0.5f32, 0.3, 0.2];
        apply_temperature(&mut sharp, 0.5);
        assert!(sharp[0] > 0.5);
        assert!((sharp.iter().sum::<f32>() - 1.0).abs() < 1e-5);

        let mut flat = vec![0.5f32, 0.3, 0.2];
        apply_temperature(&mut flat, 2.0);
        assert!(flat[0] < 0.5);
        assert!(flat[0] > flat[1] && flat[1] > flat[2]);
    }

    #[test]
    fn test_apply_temperature_degenerate_inputs() {
        let mut p = vec![0.5f32, 0.5];
        apply_temperature(&mut p, 0.0);
        assert_eq!(p, vec![0.5, 0.5]);
        apply_temperature(&mut p, f32::NAN);
        assert_eq!(p, vec![0.5, 0.5]);
    }
}
