//! Arena storage for nodes and edges.
//!
//! Both pools are chunked bump allocators: handles are `u32` slot ids, chunk
//! storage never moves, and during a search the arenas are append-only, so
//! readers can hold `&T` across allocations by other threads. Slot release
//! (the release service) and compaction (`defragment`) are the only
//! destruction paths.
//!
//! Safety rests on three invariants, enforced by the API:
//!
//! * a slot is fully written and its live flag set before its id is
//!   published to any other thread;
//! * a released slot is unreachable (not in the cache, not the root, not a
//!   live node's child) before `release` is called on it;
//! * compaction and teardown take `&mut self`, which the caller guarantees
//!   by stopping every search worker and draining the release service first.

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};

use arbor_core::Game;
use rustc_hash::FxHashMap;

use crate::cache::NodeCache;
use crate::node::{Edge, EdgeRun, Node, NodeId};

const CHUNK_BITS: u32 = 10;
/// Slots per chunk. Must exceed any game's maximum branching factor so an
/// edge run always fits inside a single chunk.
pub const CHUNK_SIZE: usize = 1 << CHUNK_BITS;

struct Chunk<T> {
    ptr: *mut MaybeUninit<T>,
    live: Box<[AtomicBool]>,
}

impl<T> Chunk<T> {
    fn new() -> Self {
        let mut storage: Vec<MaybeUninit<T>> = Vec::with_capacity(CHUNK_SIZE);
        // SAFETY: MaybeUninit<T> requires no initialization.
        unsafe { storage.set_len(CHUNK_SIZE) };
        let ptr = Box::into_raw(storage.into_boxed_slice()) as *mut MaybeUninit<T>;
        let live = (0..CHUNK_SIZE).map(|_| AtomicBool::new(false)).collect();
        Self { ptr, live }
    }
}

// SAFETY: the raw chunk pointer is owned storage; access discipline is
// documented on `Arena`.
unsafe impl<T: Send> Send for Chunk<T> {}
unsafe impl<T: Send + Sync> Sync for Chunk<T> {}

/// Chunked, append-only arena with stable slot addresses.
pub struct Arena<T> {
    chunks: RwLock<Vec<Chunk<T>>>,
    /// High-water mark; slot ids below it are allocated or skipped.
    len: AtomicU32,
    /// Serializes allocators; readers never take it.
    grow: Mutex<()>,
    /// Released or skipped slots below the high-water mark.
    dead: AtomicU32,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            len: AtomicU32::new(0),
            grow: Mutex::new(()),
            dead: AtomicU32::new(0),
        }
    }

    #[inline]
    fn split(id: u32) -> (usize, usize) {
        (
            (id >> CHUNK_BITS) as usize,
            (id & (CHUNK_SIZE as u32 - 1)) as usize,
        )
    }

    /// Number of slot ids handed out (live + dead).
    pub fn len(&self) -> u32 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of handed-out slots that have been released.
    pub fn dead_fraction(&self) -> f64 {
        let len = self.len();
        if len == 0 {
            0.0
        } else {
            self.dead.load(Ordering::Acquire) as f64 / len as f64
        }
    }

    fn ensure_chunk(&self, chunk_index: usize) {
        let need_grow = {
            let chunks = self.chunks.read().unwrap();
            chunks.len() <= chunk_index
        };
        if need_grow {
            let mut chunks = self.chunks.write().unwrap();
            while chunks.len() <= chunk_index {
                chunks.push(Chunk::new());
            }
        }
    }

    /// Bump-allocate one slot.
    pub fn alloc(&self, value: T) -> u32 {
        let _grow = self.grow.lock().unwrap();
        let id = self.len.load(Ordering::Relaxed);
        let (ci, si) = Self::split(id);
        self.ensure_chunk(ci);

        let chunks = self.chunks.read().unwrap();
        let chunk = &chunks[ci];
        // SAFETY: `grow` makes this thread the only writer of slot `id`, and
        // the slot is not yet published (id >= len).
        unsafe { (*chunk.ptr.add(si)).write(value) };
        chunk.live[si].store(true, Ordering::Release);
        drop(chunks);

        self.len.store(id + 1, Ordering::Release);
        id
    }

    /// Bump-allocate a contiguous run. The run never straddles a chunk
    /// boundary; slots skipped to reach a fresh chunk are counted dead.
    pub fn alloc_run<I>(&self, items: I) -> u32
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let items = items.into_iter();
        let n = items.len();
        debug_assert!(n > 0 && n <= CHUNK_SIZE);

        let _grow = self.grow.lock().unwrap();
        let mut id = self.len.load(Ordering::Relaxed);
        let (ci, si) = Self::split(id);
        if si + n > CHUNK_SIZE {
            let skipped = (CHUNK_SIZE - si) as u32;
            self.dead.fetch_add(skipped, Ordering::AcqRel);
            id += skipped;
        }
        let (ci, si) = if si + n > CHUNK_SIZE {
            ((ci + 1), 0)
        } else {
            (ci, si)
        };
        self.ensure_chunk(ci);

        let chunks = self.chunks.read().unwrap();
        let chunk = &chunks[ci];
        let mut written = 0usize;
        for (offset, value) in items.enumerate() {
            // SAFETY: sole writer of unpublished slots (see `alloc`).
            unsafe { (*chunk.ptr.add(si + offset)).write(value) };
            chunk.live[si + offset].store(true, Ordering::Release);
            written += 1;
        }
        debug_assert_eq!(written, n);
        drop(chunks);

        self.len.store(id + n as u32, Ordering::Release);
        id
    }

    /// Shared access to a live slot.
    pub fn get(&self, id: u32) -> &T {
        debug_assert!(id < self.len());
        let (ci, si) = Self::split(id);
        let chunks = self.chunks.read().unwrap();
        let chunk = &chunks[ci];
        debug_assert!(chunk.live[si].load(Ordering::Acquire), "dead slot {id}");
        let ptr = chunk.ptr;
        drop(chunks);
        // SAFETY: the slot was initialized before its id was published;
        // chunk storage is freed only through `&mut self` methods, so it
        // outlives this borrow of `&self`.
        unsafe { &*(ptr.add(si) as *const T) }
    }

    /// Exclusive access to a live slot.
    pub fn get_mut(&mut self, id: u32) -> &mut T {
        let (ci, si) = Self::split(id);
        let chunks = self.chunks.get_mut().unwrap();
        let chunk = &mut chunks[ci];
        debug_assert!(chunk.live[si].load(Ordering::Acquire), "dead slot {id}");
        // SAFETY: `&mut self` excludes every other accessor.
        unsafe { &mut *(chunk.ptr.add(si) as *mut T) }
    }

    pub fn is_live(&self, id: u32) -> bool {
        if id >= self.len() {
            return false;
        }
        let (ci, si) = Self::split(id);
        let chunks = self.chunks.read().unwrap();
        chunks[ci].live[si].load(Ordering::Acquire)
    }

    /// Drop a slot's value in place. The caller guarantees the slot is
    /// unreachable by every other thread. Safe to call concurrently with
    /// allocation and with reads of *other* slots; double release is a no-op.
    pub fn release(&self, id: u32) {
        debug_assert!(id < self.len());
        let (ci, si) = Self::split(id);
        let chunks = self.chunks.read().unwrap();
        let chunk = &chunks[ci];
        if chunk.live[si].swap(false, Ordering::AcqRel) {
            // SAFETY: the live flag transition makes this thread the sole
            // owner of the slot's value, and the caller guarantees no reader
            // can reach the id anymore.
            unsafe { std::ptr::drop_in_place(chunk.ptr.add(si) as *mut T) };
            self.dead.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Move a live slot's value out, marking the slot dead without running
    /// its destructor. Compaction-time only.
    fn take(&mut self, id: u32) -> T {
        let (ci, si) = Self::split(id);
        let chunks = self.chunks.get_mut().unwrap();
        let chunk = &mut chunks[ci];
        let was_live = chunk.live[si].swap(false, Ordering::AcqRel);
        debug_assert!(was_live, "take of dead slot {id}");
        // SAFETY: slot was live and `&mut self` excludes other accessors.
        unsafe { (*chunk.ptr.add(si)).assume_init_read() }
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Arena<T> {
    fn drop(&mut self) {
        let chunks = std::mem::take(self.chunks.get_mut().unwrap());
        for chunk in chunks {
            for (si, flag) in chunk.live.iter().enumerate() {
                if flag.load(Ordering::Acquire) {
                    // SAFETY: exclusive access during drop.
                    unsafe { std::ptr::drop_in_place(chunk.ptr.add(si) as *mut T) };
                }
            }
            // SAFETY: `ptr` came from `Box::into_raw` of a CHUNK_SIZE slice.
            unsafe {
                drop(Box::from_raw(std::slice::from_raw_parts_mut(
                    chunk.ptr, CHUNK_SIZE,
                )));
            }
        }
    }
}

// SAFETY: all interior mutation is synchronized (grow mutex + per-slot live
// flags + release/acquire publication of `len`).
unsafe impl<T: Send> Send for Arena<T> {}
unsafe impl<T: Send + Sync> Sync for Arena<T> {}

/// Release one node's slot and its edge-run slots.
pub fn release_node<G: Game>(nodes: &Arena<Node<G>>, edges: &Arena<Edge>, id: NodeId) {
    if id.is_none() || !nodes.is_live(id.0) {
        return;
    }
    if let Some(run) = nodes.get(id.0).edge_run() {
        for eid in run.indices() {
            edges.release(eid);
        }
    }
    nodes.release(id.0);
}

/// Mark-compact defragmentation after a root advance detached a large
/// subtree.
///
/// Live means reachable from `root`. Both arenas are rebuilt with live
/// entries packed tight in ascending old-id order (preserving deterministic
/// edge ordering), then every surviving handle is rewritten: the root, each
/// node's edge run, each edge's child, and the cache's entries (entries whose
/// node did not survive are evicted).
///
/// Callers must guarantee no search worker is active and the release service
/// is idle; exclusive borrows enforce most of that at compile time.
pub fn defragment<G: Game>(
    nodes: &mut Arena<Node<G>>,
    edges: &mut Arena<Edge>,
    cache: &mut NodeCache<G>,
    root: &mut NodeId,
) {
    if root.is_none() {
        return;
    }

    // Mark phase: collect reachable node ids.
    let mut live: Vec<u32> = Vec::new();
    let mut seen: FxHashMap<u32, ()> = FxHashMap::default();
    let mut stack = vec![root.0];
    seen.insert(root.0, ());
    while let Some(id) = stack.pop() {
        live.push(id);
        if let Some(run) = nodes.get(id).edge_run() {
            for eid in run.indices() {
                let child = edges.get(eid).child();
                if child.is_some() && seen.insert(child.0, ()).is_none() {
                    stack.push(child.0);
                }
            }
        }
    }
    live.sort_unstable();

    // Assign new ids in ascending old-id order.
    let mut remap: FxHashMap<u32, u32> = FxHashMap::default();
    for (new_id, &old_id) in live.iter().enumerate() {
        remap.insert(old_id, new_id as u32);
    }

    // Move phase: rebuild both arenas.
    let new_nodes: Arena<Node<G>> = Arena::new();
    let new_edges: Arena<Edge> = Arena::new();
    for &old_id in &live {
        let mut node = nodes.take(old_id);
        let new_run = node.edge_run().map(|run| {
            let start = new_edges.alloc_run(run.indices().map(|eid| {
                let edge = edges.get(eid);
                let mut new_edge = Edge::new(edge.action(), edge.local_index(), edge.prior());
                let child = edge.child();
                if child.is_some() {
                    // Reachable through a live parent, so present in remap.
                    new_edge.link_child(NodeId(remap[&child.0]));
                }
                new_edge.set_count(edge.count());
                new_edge
            }));
            EdgeRun {
                start,
                len: run.len,
            }
        });
        node.remap_edges(new_run);
        let new_id = new_nodes.alloc(node);
        debug_assert_eq!(new_id, remap[&old_id]);
    }

    cache.retain_remap(|old| remap.get(&old.0).map(|&new| NodeId(new)));
    *root = NodeId(remap[&root.0]);
    *nodes = new_nodes;
    *edges = new_edges;
}
