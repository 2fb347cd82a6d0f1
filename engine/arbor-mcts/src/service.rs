//! The batched network-evaluation service.
//!
//! Many worker threads call [`EvaluatorService::evaluate`] concurrently; the
//! service coalesces their positions into batches for the model and caches
//! results in an LRU keyed by `(position fingerprint, symmetry index)`.
//!
//! The batch is double-buffered through a small metadata record:
//!
//! 1. *Cache check* under the cache mutex; a hit returns immediately.
//! 2. *Reserve* a slot under the metadata mutex, waiting until the previous
//!    batch is fully read, a slot is free, and reservations are open. The
//!    first reservation arms the flush deadline.
//! 3. *Tensorize + transform* into the reserved slot under the batch-data
//!    mutex (the metadata mutex is not held).
//! 4. *Commit* under the metadata mutex, then wait until the batch has been
//!    evaluated.
//! 5. *Read* the slot's evaluation handle, then wait until every slot of the
//!    batch has been read, so all members of a batch leave together.
//!
//! The service loop mirrors those waits from the other side: wait for the
//! previous batch to drain, wait for a first reservation, wait until the
//! batch fills or the deadline passes, close reservations, wait for all
//! commits, run the model, publish results, reopen reservations.
//!
//! A model failure is latched as fatal: the loop exits, every current and
//! future waiter gets the error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arbor_core::{ActionMask, Game, NUM_PLAYERS};
use tracing::{debug, trace, warn};

use crate::evaluator::{
    value_distribution, Evaluation, Evaluator, EvaluatorError, InputBatch,
};
use crate::lru::LruCache;
use crate::node::Node;
use crate::options::SearchOptions;

#[derive(Debug)]
struct BatchMeta {
    reserve_index: usize,
    commit_count: usize,
    unread_count: usize,
    accepting_reservations: bool,
    deadline: Instant,
}

struct Slot<G: Game> {
    key: Option<(G::Key, u8)>,
    valid: ActionMask,
    sym: u8,
    result: Option<Arc<Evaluation>>,
}

impl<G: Game> Slot<G> {
    fn empty() -> Self {
        Self {
            key: None,
            valid: ActionMask::EMPTY,
            sym: 0,
            result: None,
        }
    }
}

struct BatchData<G: Game> {
    input: Vec<f32>,
    slots: Vec<Slot<G>>,
}

struct Connection {
    count: usize,
    handle: Option<JoinHandle<()>>,
}

/// Cache instrumentation snapshot.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

pub struct EvaluatorService<G: Game> {
    model: Box<dyn Evaluator>,
    batch_limit: usize,
    timeout: Duration,

    meta: Mutex<BatchMeta>,
    /// Wakes the service loop (reservations, commits, drained batches).
    cv_service: Condvar,
    /// Wakes requesters (slot free, batch evaluated, batch drained).
    cv_ready: Condvar,

    batch: Mutex<BatchData<G>>,
    cache: Mutex<LruCache<(G::Key, u8), Arc<Evaluation>>>,
    conn: Mutex<Connection>,
    active: AtomicBool,
    fatal: Mutex<Option<EvaluatorError>>,

    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    batches_evaluated: AtomicU64,
    positions_evaluated: AtomicU64,
    puct_calcs: AtomicU64,
    puct_calcs_virtual: AtomicU64,
}

impl<G: Game> EvaluatorService<G> {
    pub fn new(model: Box<dyn Evaluator>, options: &SearchOptions) -> Arc<Self> {
        let batch_limit = options.batch_size_limit;
        Arc::new(Self {
            model,
            batch_limit,
            timeout: options.eval_timeout,
            meta: Mutex::new(BatchMeta {
                reserve_index: 0,
                commit_count: 0,
                unread_count: 0,
                accepting_reservations: true,
                deadline: Instant::now(),
            }),
            cv_service: Condvar::new(),
            cv_ready: Condvar::new(),
            batch: Mutex::new(BatchData {
                input: vec![0.0; batch_limit * G::INPUT_LEN],
                slots: (0..batch_limit).map(|_| Slot::empty()).collect(),
            }),
            cache: Mutex::new(LruCache::new(options.eval_cache_size)),
            conn: Mutex::new(Connection {
                count: 0,
                handle: None,
            }),
            active: AtomicBool::new(false),
            fatal: Mutex::new(None),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            batches_evaluated: AtomicU64::new(0),
            positions_evaluated: AtomicU64::new(0),
            puct_calcs: AtomicU64::new(0),
            puct_calcs_virtual: AtomicU64::new(0),
        })
    }

    pub fn batch_size_limit(&self) -> usize {
        self.batch_limit
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.lock().unwrap().capacity()
    }

    fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn shutdown_error(&self) -> EvaluatorError {
        self.fatal
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(EvaluatorError::Disconnected)
    }

    fn latch_fatal(&self, err: EvaluatorError) {
        warn!(error = %err, "evaluator service failed; latching fatal error");
        *self.fatal.lock().unwrap() = Some(err);
        self.active.store(false, Ordering::Release);
        self.cv_service.notify_all();
        self.cv_ready.notify_all();
    }

    /// Reference-count the service loop thread: the first connect spawns it.
    pub fn connect(self: &Arc<Self>) {
        let mut conn = self.conn.lock().unwrap();
        conn.count += 1;
        if conn.handle.is_none() {
            self.active.store(true, Ordering::Release);
            let svc = Arc::clone(self);
            conn.handle = Some(std::thread::spawn(move || svc.run_loop()));
            debug!(batch_limit = self.batch_limit, "evaluator service started");
        }
    }

    /// Drop one connection; the last disconnect stops and joins the loop.
    pub fn disconnect(&self) {
        let handle = {
            let mut conn = self.conn.lock().unwrap();
            if conn.count == 0 {
                return;
            }
            conn.count -= 1;
            if conn.count > 0 {
                return;
            }
            self.active.store(false, Ordering::Release);
            self.cv_service.notify_all();
            self.cv_ready.notify_all();
            conn.handle.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
            debug!("evaluator service stopped");
        }
    }

    /// Blocking evaluation of one node's position under its symmetry.
    ///
    /// Returns the evaluation handle and whether it came from the cache.
    pub fn evaluate(
        &self,
        node: &Node<G>,
        thread_id: usize,
    ) -> Result<(Arc<Evaluation>, bool), EvaluatorError> {
        if !self.active() {
            return Err(self.shutdown_error());
        }

        let base = G::base_state(node.state());
        let key = (G::key(&base), node.sym());

        // Cache check.
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(hit) = cache.get(&key) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                trace!(thread_id, "evaluation cache hit");
                return Ok((Arc::clone(hit), true));
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        // Reserve a slot.
        let my_index = {
            let mut meta = self.meta.lock().unwrap();
            loop {
                if !self.active() {
                    return Err(self.shutdown_error());
                }
                if meta.unread_count == 0
                    && meta.reserve_index < self.batch_limit
                    && meta.accepting_reservations
                {
                    break;
                }
                meta = self.cv_ready.wait(meta).unwrap();
            }
            let index = meta.reserve_index;
            meta.reserve_index += 1;
            if index == 0 {
                meta.deadline = Instant::now() + self.timeout;
            }
            self.cv_service.notify_one();
            index
            // The slot is now reserved but not committed: other requesters
            // are blocked from taking it, the loop will not evaluate yet.
        };

        // Tensorize and transform into the reserved slot.
        {
            let mut batch = self.batch.lock().unwrap();
            let row_len = G::INPUT_LEN;
            let row = &mut batch.input[my_index * row_len..(my_index + 1) * row_len];
            let mut view = base;
            if node.sym() != 0 {
                G::transform_state(&mut view, node.sym());
            }
            G::tensorize(&view, row);
            batch.slots[my_index] = Slot {
                key: Some(key),
                valid: node.valid_actions(),
                sym: node.sym(),
                result: None,
            };
        }

        // Commit, then wait for the batch to be evaluated.
        {
            let mut meta = self.meta.lock().unwrap();
            meta.commit_count += 1;
            self.cv_service.notify_one();
            while meta.reserve_index != 0 {
                if !self.active() {
                    return Err(self.shutdown_error());
                }
                meta = self.cv_ready.wait(meta).unwrap();
            }
        }

        // Read the result.
        let result = {
            let batch = self.batch.lock().unwrap();
            batch.slots[my_index].result.clone()
        };
        let Some(evaluation) = result else {
            return Err(self.shutdown_error());
        };

        // Leave together: wait until every member of the batch has read.
        {
            let mut meta = self.meta.lock().unwrap();
            debug_assert!(meta.unread_count > 0);
            meta.unread_count -= 1;
            if meta.unread_count == 0 {
                self.cv_service.notify_all();
                self.cv_ready.notify_all();
            }
            while meta.unread_count != 0 && self.active() {
                meta = self.cv_ready.wait(meta).unwrap();
            }
        }

        trace!(thread_id, slot = my_index, "evaluated");
        Ok((evaluation, false))
    }

    fn run_loop(self: Arc<Self>) {
        loop {
            let committed = {
                let mut meta = self.meta.lock().unwrap();

                // Previous batch fully read.
                while meta.unread_count != 0 && self.active() {
                    meta = self.cv_service.wait(meta).unwrap();
                }
                if !self.active() {
                    return;
                }

                // First reservation arms the deadline.
                while meta.reserve_index == 0 && self.active() {
                    meta = self.cv_service.wait(meta).unwrap();
                }
                if !self.active() {
                    return;
                }

                // Fill up or flush on deadline.
                loop {
                    if meta.reserve_index >= self.batch_limit {
                        break;
                    }
                    let now = Instant::now();
                    if now >= meta.deadline {
                        break;
                    }
                    let wait = meta.deadline - now;
                    let (guard, _) = self.cv_service.wait_timeout(meta, wait).unwrap();
                    meta = guard;
                    if !self.active() {
                        return;
                    }
                }
                meta.accepting_reservations = false;

                // Everyone who reserved has written their slot.
                while meta.commit_count != meta.reserve_index && self.active() {
                    meta = self.cv_service.wait(meta).unwrap();
                }
                if !self.active() {
                    return;
                }
                meta.commit_count
            };

            match self.evaluate_batch(committed) {
                Ok(()) => {
                    let mut meta = self.meta.lock().unwrap();
                    meta.unread_count = meta.commit_count;
                    meta.reserve_index = 0;
                    meta.commit_count = 0;
                    meta.accepting_reservations = true;
                    drop(meta);
                    self.cv_ready.notify_all();
                }
                Err(err) => {
                    self.latch_fatal(err);
                    return;
                }
            }
        }
    }

    /// Run the model on the committed prefix of the batch, undo each slot's
    /// symmetry on the policy, and publish results to the slots and cache.
    fn evaluate_batch(&self, rows: usize) -> Result<(), EvaluatorError> {
        let mut batch = self.batch.lock().unwrap();
        let row_len = G::INPUT_LEN;

        let output = self.model.predict(
            &InputBatch {
                data: &batch.input[..rows * row_len],
                rows,
                row_len,
            },
            G::NUM_ACTIONS,
        )?;

        if output.values.len() != rows * NUM_PLAYERS {
            return Err(EvaluatorError::Shape(format!(
                "expected {} value logits, got {}",
                rows * NUM_PLAYERS,
                output.values.len()
            )));
        }
        if output.policy_logits.len() != rows * G::NUM_ACTIONS {
            return Err(EvaluatorError::Shape(format!(
                "expected {} policy logits, got {}",
                rows * G::NUM_ACTIONS,
                output.policy_logits.len()
            )));
        }

        let mut policy = output.policy_logits;
        for i in 0..rows {
            let slot = &mut batch.slots[i];
            let row = &mut policy[i * G::NUM_ACTIONS..(i + 1) * G::NUM_ACTIONS];
            let inverse = G::inverse_symmetry(slot.sym);
            if slot.sym != 0 {
                G::transform_policy(row, inverse);
            }
            let local: Box<[f32]> = slot.valid.iter().map(|a| row[a as usize]).collect();
            let value =
                value_distribution(&output.values[i * NUM_PLAYERS..(i + 1) * NUM_PLAYERS]);
            slot.result = Some(Arc::new(Evaluation {
                value,
                local_policy_logits: local,
            }));
        }

        {
            let mut cache = self.cache.lock().unwrap();
            for slot in batch.slots.iter_mut().take(rows) {
                if let (Some(key), Some(result)) = (slot.key.take(), slot.result.as_ref()) {
                    cache.insert(key, Arc::clone(result));
                }
            }
        }

        self.positions_evaluated
            .fetch_add(rows as u64, Ordering::Relaxed);
        self.batches_evaluated.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    // -- instrumentation --------------------------------------------------

    /// Pure counter: one PUCT computation, flagged when virtual losses were
    /// present among the children.
    pub fn record_puct_calc(&self, virtual_loss_influenced: bool) {
        self.puct_calcs.fetch_add(1, Ordering::Relaxed);
        if virtual_loss_influenced {
            self.puct_calcs_virtual.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn pct_virtual_loss_influenced_puct_calcs(&self) -> f64 {
        let total = self.puct_calcs.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        100.0 * self.puct_calcs_virtual.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.cache_hits.load(Ordering::Relaxed),
            misses: self.cache_misses.load(Ordering::Relaxed),
            size: self.cache.lock().unwrap().len(),
        }
    }

    pub fn batches_evaluated(&self) -> u64 {
        self.batches_evaluated.load(Ordering::Relaxed)
    }

    pub fn positions_evaluated(&self) -> u64 {
        self.positions_evaluated.load(Ordering::Relaxed)
    }

    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_evaluated().max(1);
        self.positions_evaluated() as f64 / batches as f64
    }
}

impl<G: Game> Drop for EvaluatorService<G> {
    fn drop(&mut self) {
        // A leaked connection must not leave the loop thread running.
        let handle = {
            let mut conn = self.conn.lock().unwrap();
            self.active.store(false, Ordering::Release);
            conn.handle.take()
        };
        self.cv_service.notify_all();
        self.cv_ready.notify_all();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::UniformEvaluator;
    use games_tictactoe::{State, TicTacToe};

    fn test_options() -> SearchOptions {
        SearchOptions::for_testing()
    }

    fn fresh_node() -> Node<TicTacToe> {
        Node::new(State::new(), None, 0)
    }

    #[test]
    fn test_evaluate_uniform() {
        let svc = EvaluatorService::<TicTacToe>::new(
            Box::new(UniformEvaluator::new()),
            &test_options(),
        );
        svc.connect();

        let node = fresh_node();
        let (eval, used_cache) = svc.evaluate(&node, 0).unwrap();
        assert!(!used_cache);
        assert!((eval.value.get(0) - 0.5).abs() < 1e-6);
        let p = eval.local_policy();
        assert_eq!(p.len(), 9);
        assert!((p[0] - 1.0 / 9.0).abs() < 1e-6);

        svc.disconnect();
    }

    #[test]
    fn test_cache_hit_on_repeat() {
        let svc = EvaluatorService::<TicTacToe>::new(
            Box::new(UniformEvaluator::new()),
            &test_options(),
        );
        svc.connect();

        let node = fresh_node();
        let (first, c1) = svc.evaluate(&node, 0).unwrap();
        let (second, c2) = svc.evaluate(&node, 0).unwrap();
        assert!(!c1);
        assert!(c2);
        assert!(Arc::ptr_eq(&first, &second));

        let stats = svc.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);

        svc.disconnect();
    }

    #[test]
    fn test_symmetry_keys_are_distinct() {
        let svc = EvaluatorService::<TicTacToe>::new(
            Box::new(UniformEvaluator::new()),
            &test_options(),
        );
        svc.connect();

        let plain = fresh_node();
        let rotated: Node<TicTacToe> = Node::new(State::new(), None, 1);
        svc.evaluate(&plain, 0).unwrap();
        let (_, cached) = svc.evaluate(&rotated, 0).unwrap();
        assert!(!cached, "different symmetry index must miss the cache");

        svc.disconnect();
    }

    #[test]
    fn test_concurrent_requests_batch() {
        let svc = EvaluatorService::<TicTacToe>::new(
            Box::new(UniformEvaluator::new()),
            &SearchOptions::for_testing().with_batch_size(4),
        );
        svc.connect();

        // Distinct positions so nothing is served from cache.
        let mut handles = Vec::new();
        for cell in 0..4u8 {
            let svc = Arc::clone(&svc);
            handles.push(std::thread::spawn(move || {
                let mut state = State::new();
                state.make_move(cell);
                let node: Node<TicTacToe> = Node::new(state, None, 0);
                svc.evaluate(&node, cell as usize).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(svc.positions_evaluated(), 4);
        assert!(svc.batches_evaluated() <= 4);
        svc.disconnect();
    }

    #[test]
    fn test_model_failure_is_fatal() {
        struct FailingEvaluator;
        impl Evaluator for FailingEvaluator {
            fn predict(
                &self,
                _batch: &InputBatch<'_>,
                _num_actions: usize,
            ) -> Result<crate::evaluator::BatchOutput, EvaluatorError> {
                Err(EvaluatorError::Model("boom".to_string()))
            }
        }

        let svc =
            EvaluatorService::<TicTacToe>::new(Box::new(FailingEvaluator), &test_options());
        svc.connect();

        let node = fresh_node();
        let err = svc.evaluate(&node, 0).unwrap_err();
        assert!(matches!(err, EvaluatorError::Model(_)));

        // Subsequent requests fail fast with the latched error.
        let err = svc.evaluate(&node, 0).unwrap_err();
        assert!(matches!(err, EvaluatorError::Model(_)));
        svc.disconnect();
    }

    #[test]
    fn test_record_puct_calcs() {
        let svc = EvaluatorService::<TicTacToe>::new(
            Box::new(UniformEvaluator::new()),
            &test_options(),
        );
        svc.record_puct_calc(true);
        svc.record_puct_calc(false);
        svc.record_puct_calc(false);
        let pct = svc.pct_virtual_loss_influenced_puct_calcs();
        assert!((pct - 33.33).abs() < 0.5);
    }
}
