//! Background subtree release.
//!
//! Root advance evicts whole move-number populations from the node cache;
//! freeing their nodes (and edge runs) is pure bookkeeping that should not
//! hold up the game loop, so it happens on a low-priority background thread.
//!
//! The service owns a pair of work queues swapped front-for-back: submitters
//! push to the front queue under a short lock, the worker swaps and drains
//! the back queue without blocking them. `wait_idle` lets the manager
//! exclude the service before defragmenting (the worker holds the shared
//! state only as a `Weak`, upgraded per drained batch, so an idle service
//! pins nothing).

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;

use arbor_core::Game;
use tracing::{debug, trace};

use crate::node::NodeId;
use crate::pool::release_node;
use crate::shared::SearchShared;

struct QueueState {
    queues: [Vec<Vec<NodeId>>; 2],
    front: usize,
    busy: bool,
    shutdown: bool,
    released_nodes: u64,
    max_queue_len: usize,
}

struct Inner {
    state: Mutex<QueueState>,
    cv: Condvar,
    cv_idle: Condvar,
}

pub struct ReleaseService {
    inner: Arc<Inner>,
    handle: Option<JoinHandle<()>>,
}

impl ReleaseService {
    pub fn spawn<G: Game>(shared: Weak<SearchShared<G>>) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(QueueState {
                queues: [Vec::new(), Vec::new()],
                front: 0,
                busy: false,
                shutdown: false,
                released_nodes: 0,
                max_queue_len: 0,
            }),
            cv: Condvar::new(),
            cv_idle: Condvar::new(),
        });
        let worker_inner = Arc::clone(&inner);
        let handle = std::thread::spawn(move || run_loop(worker_inner, shared));
        Self {
            inner,
            handle: Some(handle),
        }
    }

    /// Queue one population of unreachable nodes for destruction.
    pub fn submit(&self, unit: Vec<NodeId>) {
        if unit.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock().unwrap();
        let front = state.front;
        state.queues[front].push(unit);
        let depth = state.queues[front].len();
        state.max_queue_len = state.max_queue_len.max(depth);
        drop(state);
        self.inner.cv.notify_one();
    }

    /// Block until both queues are drained and the worker is between
    /// batches. After this returns (and with no new submissions) the worker
    /// holds no reference to the shared search state.
    pub fn wait_idle(&self) {
        let mut state = self.inner.state.lock().unwrap();
        while state.busy || !state.queues[0].is_empty() || !state.queues[1].is_empty() {
            state = self.inner.cv_idle.wait(state).unwrap();
        }
    }

    pub fn released_nodes(&self) -> u64 {
        self.inner.state.lock().unwrap().released_nodes
    }
}

impl Drop for ReleaseService {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.shutdown = true;
        }
        self.inner.cv.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop<G: Game>(inner: Arc<Inner>, shared: Weak<SearchShared<G>>) {
    loop {
        let batch = {
            let mut state = inner.state.lock().unwrap();
            loop {
                let front = state.front;
                if !state.queues[front].is_empty() {
                    break;
                }
                if state.shutdown {
                    return;
                }
                state = inner.cv.wait(state).unwrap();
            }
            let work = state.front;
            state.front = 1 - work;
            state.busy = true;
            std::mem::take(&mut state.queues[work])
        };

        let mut released = 0u64;
        if let Some(shared) = shared.upgrade() {
            for unit in &batch {
                for &id in unit {
                    release_node(&shared.nodes, &shared.edges, id);
                    released += 1;
                }
            }
            trace!(released, "release batch processed");
        } else {
            debug!("search state gone; dropping release batch");
        }

        let mut state = inner.state.lock().unwrap();
        state.busy = false;
        state.released_nodes += released;
        if state.queues[0].is_empty() && state.queues[1].is_empty() {
            inner.cv_idle.notify_all();
        }
    }
}
