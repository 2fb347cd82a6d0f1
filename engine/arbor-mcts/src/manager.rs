//! The search manager: root ownership, worker lifecycle, root advance with
//! subtree reuse, pondering, result assembly and target pruning.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use arbor_core::{Game, Seat};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info, warn};

use crate::node::{Node, NodeId};
use crate::options::{ConfigError, SearchOptions, SearchParams};
use crate::pool;
use crate::puct::{PuctStats, PUCT_EPS};
use crate::release::ReleaseService;
use crate::results::SearchResults;
use crate::schedule::TemperatureSchedule;
use crate::search::{RunParams, SearchError, SearchThread};
use crate::service::EvaluatorService;
use crate::shared::SearchShared;

/// Process-wide allocator of manager instance ids, handed around explicitly
/// rather than living in a global. Ids name summary files and log spans.
#[derive(Debug, Clone, Default)]
pub struct InstanceIds {
    next: Arc<AtomicU32>,
}

impl InstanceIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Aggregate numbers from a tree integrity walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeAudit {
    pub nodes: usize,
    pub edges: usize,
    pub max_depth: u32,
}

#[derive(Debug, Clone, Copy)]
struct RootInfo {
    id: NodeId,
    /// Whether the node cache holds this root (fresh noisy roots are
    /// pool-only so exploration noise never leaks into reusable nodes).
    cached: bool,
}

/// Owns the search tree's root and drives worker threads over the shared
/// state. One manager per agent; managers may share an evaluator service.
pub struct SearchManager<G: Game> {
    // Field order matters for teardown: the release service joins its
    // worker before the shared state (and its arenas) is dropped.
    release: ReleaseService,
    shared: Arc<SearchShared<G>>,
    workers: Vec<JoinHandle<()>>,
    root: Option<RootInfo>,
    temperature: TemperatureSchedule,
    instance_id: u32,
    connected: bool,
    base_seed: u64,
    /// Persistent generator for per-root symmetry draws; advances on every
    /// root built so successive noisy roots vary their orientation.
    root_rng: ChaCha20Rng,
}

impl<G: Game> SearchManager<G> {
    pub fn new(
        options: SearchOptions,
        service: Option<Arc<EvaluatorService<G>>>,
        ids: &InstanceIds,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        if let Some(service) = &service {
            // Managers may share one evaluator; their batching parameters
            // must agree with it.
            if service.batch_size_limit() != options.batch_size_limit {
                return Err(ConfigError::EvaluatorMismatch(format!(
                    "batch_size_limit {} vs {}",
                    service.batch_size_limit(),
                    options.batch_size_limit
                )));
            }
            if service.timeout() != options.eval_timeout {
                return Err(ConfigError::EvaluatorMismatch(
                    "unequal eval_timeout".to_string(),
                ));
            }
            if service.cache_capacity() != options.eval_cache_size {
                return Err(ConfigError::EvaluatorMismatch(format!(
                    "eval_cache_size {} vs {}",
                    service.cache_capacity(),
                    options.eval_cache_size
                )));
            }
        }
        let temperature = TemperatureSchedule::parse(
            &options.root_softmax_temperature,
            G::MAX_BRANCHING as f32,
        )?;
        let base_seed = options.seed.unwrap_or_else(rand::random);
        let shared = Arc::new(SearchShared::new(options, service));
        let release = ReleaseService::spawn(Arc::downgrade(&shared));
        let instance_id = ids.next_id();
        debug!(game = G::NAME, instance_id, "search manager created");
        Ok(Self {
            release,
            shared,
            workers: Vec::new(),
            root: None,
            temperature,
            instance_id,
            connected: false,
            base_seed,
            root_rng: ChaCha20Rng::seed_from_u64(base_seed ^ 0xa5a5_5a5a_dead_beef),
        })
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn options(&self) -> &SearchOptions {
        &self.shared.options
    }

    pub fn evaluator_service(&self) -> Option<&Arc<EvaluatorService<G>>> {
        self.shared.service.as_ref()
    }

    /// Begin a game session: reset the root temperature schedule and connect
    /// to the evaluator on first use.
    pub fn start(&mut self) {
        self.temperature.reset();
        if !self.connected {
            if let Some(service) = &self.shared.service {
                service.connect();
            }
            self.connected = true;
        }
    }

    /// Stop workers and drop the whole tree.
    pub fn clear(&mut self) {
        self.stop_workers();
        if let Some(old) = self.root.take() {
            if !old.cached {
                self.release.submit(vec![old.id]);
            }
        }
        let evicted = self.shared.cache.clear();
        self.release.submit(evicted);
    }

    /// Disconnect from the evaluator; the manager can be restarted with
    /// [`SearchManager::start`].
    pub fn end_session(&mut self) {
        self.stop_workers();
        if self.connected {
            if let Some(service) = &self.shared.service {
                service.disconnect();
            }
            self.connected = false;
        }
    }

    /// A move was played (by either side). Steps the temperature schedule,
    /// advances the root to the played child (reusing its subtree), evicts
    /// and releases everything from earlier move numbers, and optionally
    /// starts pondering from the new root.
    pub fn receive_state_change(&mut self, seat: Seat, state: &G::FullState, action: u16) {
        self.temperature.step();
        self.stop_workers();
        debug!(
            seat,
            action = %G::action_to_str(action),
            move_number = G::move_number(state),
            "state change"
        );

        let mut new_root: Option<NodeId> = None;
        if let Some(old) = self.root.take() {
            let node = self.shared.node(old.id);
            if let Some(run) = node.edge_run() {
                for edge_id in run.indices() {
                    let edge = self.shared.edges.get(edge_id);
                    if edge.action() == action {
                        let child = edge.child();
                        if child.is_some() {
                            new_root = Some(child);
                        }
                        break;
                    }
                }
            }
            if !old.cached {
                self.release.submit(vec![old.id]);
            }
        }

        // Everything at earlier move numbers is now unreachable from play.
        let evicted = self.shared.cache.clear_before(G::move_number(state));
        self.release.submit(evicted);

        // Guard against a caller whose state disagrees with our tree.
        if let Some(id) = new_root {
            let node = self.shared.node(id);
            let ours = G::key(&G::base_state(node.state()));
            let theirs = G::key(&G::base_state(state));
            if ours != theirs {
                warn!("state change does not match the reused child; rebuilding root");
                new_root = None;
            }
        }

        let root_id = match new_root {
            Some(id) => id,
            None => self.materialize_root(state),
        };
        self.root = Some(RootInfo {
            id: root_id,
            cached: true,
        });

        self.maybe_defragment();

        let root_terminal = self.shared.node(root_id).is_terminal();
        if self.shared.options.enable_pondering && !root_terminal {
            let params = self.shared.options.pondering_params();
            self.launch_workers(root_id, &params);
            debug!(limit = params.tree_size_limit, "pondering started");
        }
    }

    /// Run a full search from `state` and return the aggregated results.
    pub fn search(
        &mut self,
        state: &G::FullState,
        params: &SearchParams,
    ) -> Result<SearchResults, SearchError> {
        self.stop_workers();
        if let Some(err) = self.shared.take_error() {
            return Err(err);
        }

        let root_id = self.ensure_root(state, params);
        self.launch_workers(root_id, params);

        let mut panicked = false;
        for handle in self.workers.drain(..) {
            panicked |= handle.join().is_err();
        }
        self.shared.deactivate();
        if panicked {
            return Err(SearchError::WorkerPanicked);
        }
        if let Some(err) = self.shared.take_error() {
            return Err(err);
        }

        let mut results = self.assemble_results(root_id);
        let add_noise = !params.disable_exploration && self.shared.options.dirichlet_mult > 0.0;
        if self.shared.options.forced_playouts && add_noise {
            self.prune_counts(root_id, &mut results);
        }
        self.write_summary(&results);
        Ok(results)
    }

    /// Compact both arenas around the current root. Requires quiescence;
    /// returns whether compaction ran.
    pub fn defragment(&mut self) -> bool {
        self.stop_workers();
        self.release.wait_idle();
        let Some(root) = self.root.as_mut() else {
            return false;
        };
        let Some(shared) = Arc::get_mut(&mut self.shared) else {
            warn!("shared search state still referenced; skipping defragmentation");
            return false;
        };
        let before = shared.nodes.len();
        let mut root_id = root.id;
        pool::defragment(
            &mut shared.nodes,
            &mut shared.edges,
            &mut shared.cache,
            &mut root_id,
        );
        root.id = root_id;
        info!(
            before,
            after = shared.nodes.len(),
            "defragmented node arena"
        );
        true
    }

    fn maybe_defragment(&mut self) {
        if self.shared.nodes.dead_fraction() > 0.5 {
            self.defragment();
        }
    }

    // -- internals --------------------------------------------------------

    /// Find or build the root for `state`. A noisy search always gets a
    /// fresh pool-only root; otherwise the existing root is reused when it
    /// matches and the cache resolves transpositions.
    fn ensure_root(&mut self, state: &G::FullState, params: &SearchParams) -> NodeId {
        let add_noise = !params.disable_exploration && self.shared.options.dirichlet_mult > 0.0;
        let key = G::key(&G::base_state(state));

        if !add_noise {
            // Only cached roots are reusable: a pool-only root carries
            // exploration noise in its priors.
            if let Some(root) = &self.root {
                if root.cached {
                    let node = self.shared.node(root.id);
                    if node.move_number() == G::move_number(state)
                        && G::key(&G::base_state(node.state())) == key
                    {
                        return root.id;
                    }
                }
            }
        }

        if let Some(old) = self.root.take() {
            if !old.cached {
                self.release.submit(vec![old.id]);
            }
        }

        let info = if add_noise {
            let terminal = G::outcome(state).terminal_value();
            let sym = self.root_symmetry(state);
            let id = NodeId(
                self.shared
                    .nodes
                    .alloc(Node::new(state.clone(), terminal, sym)),
            );
            RootInfo { id, cached: false }
        } else {
            RootInfo {
                id: self.materialize_root(state),
                cached: true,
            }
        };
        self.root = Some(info);
        info.id
    }

    fn materialize_root(&mut self, state: &G::FullState) -> NodeId {
        let terminal = G::outcome(state).terminal_value();
        let sym = self.root_symmetry(state);
        let (id, created) =
            self.shared
                .cache
                .fetch_or_create(&self.shared.nodes, state.clone(), terminal, sym);
        if created {
            debug!(root = id.0, "root created");
        } else {
            debug!(root = id.0, "root reused from cache");
        }
        id
    }

    fn root_symmetry(&mut self, state: &G::FullState) -> u8 {
        if !self.shared.options.apply_random_symmetries {
            return G::canonical_symmetry(&G::base_state(state));
        }
        let mask = G::symmetries(state);
        let count = mask.count_ones();
        if count <= 1 {
            return 0;
        }
        let pick = self.root_rng.gen_range(0..count);
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

    fn launch_workers(&mut self, root: NodeId, params: &SearchParams) {
        debug_assert!(self.workers.is_empty());
        self.shared.activate();
        let temperature = self.temperature.value();
        for thread_id in 0..self.shared.options.num_search_threads {
            let run = RunParams::new(root, params, temperature, self.base_seed);
            let worker = SearchThread::new(Arc::clone(&self.shared), run, thread_id);
            self.workers.push(std::thread::spawn(move || worker.run()));
        }
    }

    /// Cooperative stop: clear the active flag and join everyone. In-flight
    /// evaluations complete; workers notice at their next check.
    fn stop_workers(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shared.deactivate();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    fn assemble_results(&self, root_id: NodeId) -> SearchResults {
        let node = self.shared.node(root_id);
        let seat = node.seat();
        let valid = node.valid_actions();
        let (winning, losing) = node.proven_bits();

        let mut counts = vec![0.0f32; G::NUM_ACTIONS];
        let mut policy_prior = vec![0.0f32; G::NUM_ACTIONS];

        if let Some(run) = node.edge_run() {
            struct Row {
                action: u16,
                count: f32,
                child_winning: bool,
                child_losing: bool,
            }
            let rows: Vec<Row> = run
                .indices()
                .map(|edge_id| {
                    let edge = self.shared.edges.get(edge_id);
                    let child = edge.child();
                    let (child_winning, child_losing) = if child.is_some() {
                        let (w, l) = self.shared.node(child).proven_bits();
                        (w & (1 << seat) != 0, l & (1 << seat) != 0)
                    } else {
                        (false, false)
                    };
                    Row {
                        action: edge.action(),
                        count: edge.count() as f32,
                        child_winning,
                        child_losing,
                    }
                })
                .collect();

            let any_winning = rows.iter().any(|r| r.child_winning);
            let any_losing = rows.iter().any(|r| r.child_losing);
            let all_losing = rows.iter().all(|r| r.child_losing);
            let options = &self.shared.options;

            for row in &rows {
                counts[row.action as usize] =
                    if options.exploit_proven_winners && any_winning {
                        // A proven win exists: all weight on the proofs.
                        if row.child_winning {
                            1.0
                        } else {
                            0.0
                        }
                    } else if options.avoid_proven_losers
                        && any_losing
                        && !all_losing
                        && row.child_losing
                    {
                        0.0
                    } else {
                        row.count
                    };
            }

            let prior = node.prior();
            for (edge_id, local) in run.indices().zip(prior.iter()) {
                let edge = self.shared.edges.get(edge_id);
                policy_prior[edge.action() as usize] = *local;
            }
        }

        let value_prior = match node.terminal_value() {
            Some(v) => v,
            None => node
                .evaluation()
                .map(|e| e.value)
                .unwrap_or_else(|| node.value_avg()),
        };

        SearchResults {
            valid_actions: valid,
            counts,
            policy_prior,
            win_rates: node.value_avg(),
            value_prior,
            provably_winning: winning,
            provably_losing: losing,
        }
    }

    /// Target pruning after a noisy forced-playout search: pull forced
    /// visits back out of the reported counts so the training target is not
    /// distorted. Best effort; an unusable result leaves the raw counts.
    fn prune_counts(&self, root_id: NodeId, results: &mut SearchResults) {
        let node = self.shared.node(root_id);
        if node.edge_run().is_none() {
            return;
        }
        let options = &self.shared.options;
        let stats = PuctStats::gather(&self.shared.nodes, &self.shared.edges, node, options, true);
        if stats.is_empty() {
            return;
        }

        let original = results.counts.clone();
        let n_sum = stats.n_sum();
        let sqrt_n = (n_sum + PUCT_EPS).sqrt();
        let n_forced = stats.forced_floor(options.k_forced);
        let puct_max = stats.puct.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let n_max = stats.n.iter().cloned().fold(0.0f32, f32::max);

        for i in 0..stats.len() {
            if stats.n[i] >= n_max {
                continue; // the most-visited child is left alone
            }
            let floor =
                options.cpuct * stats.p[i] * sqrt_n / (puct_max - 2.0 * stats.v[i]) - 1.0;
            if !floor.is_finite() {
                continue;
            }
            let mut pruned = floor.max(stats.n[i] - n_forced[i]);
            if pruned <= 1.0 {
                pruned = 0.0;
            }
            pruned = pruned.clamp(0.0, stats.n[i]);
            results.counts[stats.actions[i] as usize] = pruned;
        }

        let sum = results.counts_sum();
        if !(sum.is_finite() && sum > 0.0) {
            warn!("target pruning produced an unusable distribution; keeping raw counts");
            results.counts = original;
        }
    }

    /// Walk the tree from the current root and verify its structural
    /// invariants. Debug tooling: call only between searches.
    ///
    /// Checked per node: virtual counts have returned to zero; value
    /// averages are per-player probabilities that sum to one; an expanded
    /// node's real count is one (its own evaluation) plus the sum of its
    /// edge counters, a terminal or unexpanded node carries none; priors are
    /// normalized over exactly the valid actions; edge actions are unique
    /// and legal.
    pub fn check_tree_integrity(&self) -> Result<TreeAudit, SearchError> {
        use crate::node::EvalState;

        let Some(root) = &self.root else {
            return Ok(TreeAudit::default());
        };
        let integrity = |msg: String| SearchError::Integrity(msg);

        let mut audit = TreeAudit::default();
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![(root.id, 0u32)];
        seen.insert(root.id);

        while let Some((id, depth)) = stack.pop() {
            audit.nodes += 1;
            audit.max_depth = audit.max_depth.max(depth);
            let node = self.shared.node(id);
            let valid = node.valid_actions();

            {
                let stats = node.lock_stats();
                if stats.virtual_count != 0 {
                    return Err(integrity(format!(
                        "node {}: virtual count {} at rest",
                        id.0, stats.virtual_count
                    )));
                }
                if stats.real_count > 0 && !node.is_terminal() {
                    let avg = stats.value_sum.scaled_down(stats.real_count);
                    for seat in 0..2u8 {
                        if !(0.0..=1.0).contains(&avg.get(seat)) {
                            return Err(integrity(format!(
                                "node {}: value average out of range",
                                id.0
                            )));
                        }
                    }
                    if (avg.sum() - 1.0).abs() > 1e-3 {
                        return Err(integrity(format!(
                            "node {}: value average sums to {}",
                            id.0,
                            avg.sum()
                        )));
                    }
                }
            }

            {
                let eval = node.lock_eval();
                if eval.state == EvalState::Set {
                    if eval.prior.len() != valid.count() {
                        return Err(integrity(format!(
                            "node {}: prior length {} != {} valid actions",
                            id.0,
                            eval.prior.len(),
                            valid.count()
                        )));
                    }
                    let sum: f32 = eval.prior.iter().sum();
                    if (sum - 1.0).abs() > 1e-5 {
                        return Err(integrity(format!(
                            "node {}: prior sums to {sum}",
                            id.0
                        )));
                    }
                }
            }

            match node.edge_run() {
                Some(run) => {
                    if node.is_terminal() {
                        return Err(integrity(format!("terminal node {} has edges", id.0)));
                    }
                    let mut edge_sum = 0u64;
                    let mut actions = std::collections::HashSet::new();
                    for edge_id in run.indices() {
                        audit.edges += 1;
                        let edge = self.shared.edges.get(edge_id);
                        if !valid.contains(edge.action()) {
                            return Err(integrity(format!(
                                "node {}: edge action {} not valid",
                                id.0,
                                edge.action()
                            )));
                        }
                        if !actions.insert(edge.action()) {
                            return Err(integrity(format!(
                                "node {}: duplicate edge action {}",
                                id.0,
                                edge.action()
                            )));
                        }
                        edge_sum += edge.count() as u64;
                        let child = edge.child();
                        if child.is_some() && seen.insert(child) {
                            stack.push((child, depth + 1));
                        }
                    }
                    let real = node.lock_stats().real_count as u64;
                    if real != edge_sum + 1 {
                        return Err(integrity(format!(
                            "node {}: real count {} != 1 + edge sum {}",
                            id.0, real, edge_sum
                        )));
                    }
                }
                None => {
                    let real = node.lock_stats().real_count;
                    if !node.is_terminal() && real != 0 {
                        return Err(integrity(format!(
                            "unexpanded node {} has {} real visits",
                            id.0, real
                        )));
                    }
                    if node.is_terminal() && real != 0 {
                        return Err(integrity(format!(
                            "terminal node {} accumulated visits",
                            id.0
                        )));
                    }
                }
            }
        }
        Ok(audit)
    }

    /// Append a one-line summary of the finished search when enabled.
    fn write_summary(&self, results: &SearchResults) {
        let options = &self.shared.options;
        if !options.enable_search_summaries {
            return;
        }
        let Some(dir) = &options.profiling_dir else {
            return;
        };
        let path = dir.join(format!("{}-{}.log", G::NAME, self.instance_id));
        let line = match &self.shared.service {
            Some(service) => {
                let cache = service.cache_stats();
                format!(
                    "visits={:.0} batches={} avg_batch={:.2} cache_hits={} cache_misses={} vl_puct_pct={:.1}\n",
                    results.counts_sum(),
                    service.batches_evaluated(),
                    service.avg_batch_size(),
                    cache.hits,
                    cache.misses,
                    service.pct_virtual_loss_influenced_puct_calcs(),
                )
            }
            None => format!("visits={:.0} (no-model)\n", results.counts_sum()),
        };
        let written = std::fs::create_dir_all(dir).and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut f| f.write_all(line.as_bytes()))
        });
        if let Err(err) = written {
            warn!(error = %err, path = %path.display(), "failed to write search summary");
        }
    }
}

impl<G: Game> Drop for SearchManager<G> {
    fn drop(&mut self) {
        self.end_session();
    }
}
