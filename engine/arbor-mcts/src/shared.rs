//! State shared between the manager and its search workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arbor_core::Game;

use crate::cache::NodeCache;
use crate::node::{Edge, Node, NodeId};
use crate::options::SearchOptions;
use crate::pool::Arena;
use crate::search::SearchError;
use crate::service::EvaluatorService;

/// Everything a search worker touches: the arenas, the node cache, the
/// evaluator service handle, the options, the cooperative-cancellation flag,
/// and a slot for the first fatal error.
///
/// The manager holds this behind an `Arc`; workers and the release service
/// hold clones / weak references only while running, so once they are
/// stopped the manager can reclaim exclusive access (`Arc::get_mut`) for
/// defragmentation.
pub struct SearchShared<G: Game> {
    pub nodes: Arena<Node<G>>,
    pub edges: Arena<Edge>,
    pub cache: NodeCache<G>,
    pub service: Option<Arc<EvaluatorService<G>>>,
    pub options: SearchOptions,
    search_active: AtomicBool,
    error: Mutex<Option<SearchError>>,
}

impl<G: Game> SearchShared<G> {
    pub fn new(options: SearchOptions, service: Option<Arc<EvaluatorService<G>>>) -> Self {
        Self {
            nodes: Arena::new(),
            edges: Arena::new(),
            cache: NodeCache::new(),
            service,
            options,
            search_active: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node<G> {
        self.nodes.get(id.0)
    }

    #[inline]
    pub fn search_active(&self) -> bool {
        self.search_active.load(Ordering::Acquire)
    }

    pub fn activate(&self) {
        self.search_active.store(true, Ordering::Release);
    }

    pub fn deactivate(&self) {
        self.search_active.store(false, Ordering::Release);
    }

    /// Record a fatal error; the first one wins.
    pub fn record_error(&self, err: SearchError) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn take_error(&self) -> Option<SearchError> {
        self.error.lock().unwrap().take()
    }
}
