//! Per-location profiling state.
//!
//! Every location owns its call tree, its current position and depth, the
//! fork points it issued, and its recycling pools. Only the owning thread
//! touches a location during normal measurement, so each `Location` is an
//! `Arc<Mutex<..>>` that is, in practice, uncontended. The profile keeps a
//! clone of every handle so post-processing can reach all locations, even
//! those whose threads have gone away.
//!
//! Task objects and untied-task stubs may be released on a location other
//! than the one that created them. Those "foreign" objects collect locally
//! and flow back to a shared `Exchange` in one batch once there are more
//! than `task_exchange_num` of them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::definitions::{LocationId, LocationKind};
use crate::error::Error;
use crate::node::{CallTree, NodeData, NodeId};
use crate::node_type::{ForkRef, NodeKind};
use crate::tasking::TaskHandle;

/// One fork issued by a location: where, how deep, and its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ForkPoint {
    pub(crate) anchor: ForkRef,
    pub(crate) depth: u64,
    pub(crate) sequence: u32,
}

/// Shared overflow buffer for recycled objects.
///
/// `has_items` lets a location skip the lock when the buffer is known to be
/// empty; a stale `true` only costs one lock.
#[derive(Debug)]
pub struct Exchange<T> {
    items: Mutex<Vec<T>>,
    has_items: AtomicBool,
}

impl<T> Default for Exchange<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            has_items: AtomicBool::new(false),
        }
    }
}

impl<T> Exchange<T> {
    fn push_all(&self, batch: &mut Vec<T>) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.append(batch);
        self.has_items.store(true, Ordering::Release);
    }

    fn take_all(&self) -> Vec<T> {
        if !self.has_items.load(Ordering::Acquire) {
            return Vec::new();
        }
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        self.has_items.store(false, Ordering::Release);
        std::mem::take(&mut *items)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Local and foreign free lists for one kind of recyclable object.
#[derive(Debug)]
pub(crate) struct Recycler<T> {
    local: Vec<T>,
    foreign: Vec<T>,
}

impl<T> Default for Recycler<T> {
    fn default() -> Self {
        Self {
            local: Vec::new(),
            foreign: Vec::new(),
        }
    }
}

impl<T> Recycler<T> {
    /// Return `item` to the pool. Foreign items flow back to `exchange`
    /// once more than `limit` of them have collected here.
    pub(crate) fn release(
        &mut self,
        item: T,
        local: bool,
        exchange: &Exchange<T>,
        limit: u64,
        what: &str,
    ) {
        if local {
            self.local.push(item);
            return;
        }
        self.foreign.push(item);
        if self.foreign.len() as u64 > limit {
            warn!(
                "collected too many foreign {what} objects; triggering backflow. \
                 Raise ARBOR_PROFILING_TASK_EXCHANGE_NUM to make this less frequent"
            );
            exchange.push_all(&mut self.foreign);
        }
    }

    /// Take an object from the local pool, then the foreign pool, then the
    /// shared exchange.
    pub(crate) fn recycle(&mut self, exchange: &Exchange<T>) -> Option<T> {
        if let Some(item) = self.local.pop() {
            return Some(item);
        }
        if let Some(item) = self.foreign.pop() {
            return Some(item);
        }
        self.local = exchange.take_all();
        self.local.pop()
    }

    #[cfg(test)]
    pub(crate) fn foreign_len(&self) -> usize {
        self.foreign.len()
    }

    fn clear(&mut self) {
        self.local.clear();
        self.foreign.clear();
    }
}

#[derive(Debug)]
pub(crate) struct LocationData {
    pub(crate) id: LocationId,
    pub(crate) thread: u64,
    pub(crate) kind: LocationKind,
    pub(crate) parent: Option<LocationId>,
    pub(crate) tree: CallTree,
    pub(crate) root: NodeId,
    pub(crate) current: Option<NodeId>,
    pub(crate) depth: u64,
    pub(crate) implicit_depth: u64,
    pub(crate) current_implicit: Option<NodeId>,
    pub(crate) current_task: Option<TaskHandle>,
    pub(crate) implicit_task: Option<TaskHandle>,
    pub(crate) forks: Vec<ForkPoint>,
    pub(crate) stopped: bool,
    pub(crate) warned_parameter_depth: bool,
    pub(crate) migration_sum: i64,
    pub(crate) migration_win: i64,
    pub(crate) tasks: Recycler<TaskHandle>,
    pub(crate) stubs: Recycler<Vec<NodeData>>,
    /// Bumped by every finalize; node ids from an older epoch are stale.
    pub(crate) epoch: u64,
}

impl LocationData {
    pub(crate) fn new(
        id: LocationId,
        thread: u64,
        kind: LocationKind,
        parent: Option<LocationId>,
        dense_count: usize,
    ) -> Result<Self, Error> {
        let (tree, root) = Self::fresh_tree(id, thread, dense_count)?;
        Ok(Self {
            id,
            thread,
            kind,
            parent,
            tree,
            root,
            current: Some(root),
            depth: 0,
            implicit_depth: 0,
            current_implicit: Some(root),
            current_task: None,
            implicit_task: None,
            forks: Vec::new(),
            stopped: false,
            warned_parameter_depth: false,
            migration_sum: 1,
            migration_win: 0,
            tasks: Recycler::default(),
            stubs: Recycler::default(),
            epoch: 0,
        })
    }

    fn fresh_tree(
        id: LocationId,
        thread: u64,
        dense_count: usize,
    ) -> Result<(CallTree, NodeId), Error> {
        let mut tree = CallTree::new(id, dense_count);
        let root = tree.create_node(
            None,
            NodeKind::ThreadRoot {
                location: id,
                thread,
            },
            0,
            false,
        )?;
        Ok((tree, root))
    }

    /// Drop everything but the thread root. The root comes back with no
    /// children and no metrics.
    pub(crate) fn finalize(&mut self) -> Result<(), Error> {
        if !matches!(self.tree.node(self.root).kind(), NodeKind::ThreadRoot { .. }) {
            return Err(Error::RootTypeInconsistent(self.id));
        }
        let (tree, root) = Self::fresh_tree(self.id, self.thread, self.tree.dense_count())?;
        self.tree = tree;
        self.root = root;
        self.current = Some(root);
        self.current_implicit = Some(root);
        self.current_task = None;
        self.implicit_task = None;
        self.depth = 0;
        self.implicit_depth = 0;
        self.forks.clear();
        self.tasks.clear();
        self.stubs.clear();
        self.epoch += 1;
        Ok(())
    }

    /// Resize the dense metric slots for a new measurement epoch.
    pub(crate) fn reinitialize(&mut self, dense_count: usize) {
        self.tree.set_dense_count(dense_count);
    }

    pub(crate) fn local_ref(&self, node: NodeId) -> ForkRef {
        ForkRef {
            location: self.id,
            node,
        }
    }

    pub(crate) fn add_fork_point(&mut self, anchor: ForkRef, depth: u64, sequence: u32) {
        self.forks.push(ForkPoint {
            anchor,
            depth,
            sequence,
        });
    }

    pub(crate) fn remove_fork_point(&mut self) {
        self.forks.pop();
    }

    /// The most recent fork point whose sequence number does not exceed
    /// `sequence`.
    pub(crate) fn fork_point(&self, sequence: u32) -> Option<&ForkPoint> {
        self.forks.iter().rev().find(|f| f.sequence <= sequence)
    }

    pub(crate) fn fork_node(&self, sequence: u32) -> Option<ForkRef> {
        self.fork_point(sequence).map(|f| f.anchor)
    }

    pub(crate) fn fork_depth(&self, sequence: u32) -> u64 {
        self.fork_point(sequence).map_or(0, |f| f.depth)
    }
}

/// Handle to one location's profiling state.
#[derive(Debug, Clone)]
pub struct Location(Arc<Mutex<LocationData>>);

impl Location {
    pub(crate) fn new(data: LocationData) -> Self {
        Self(Arc::new(Mutex::new(data)))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, LocationData> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> LocationId {
        self.lock().id
    }

    pub fn thread(&self) -> u64 {
        self.lock().thread
    }

    pub fn kind(&self) -> LocationKind {
        self.lock().kind
    }

    pub fn root(&self) -> NodeId {
        self.lock().root
    }

    pub fn current_node(&self) -> Option<NodeId> {
        self.lock().current
    }

    pub fn current_depth(&self) -> u64 {
        self.lock().depth
    }

    /// Whether an earlier error disabled profiling on this location.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Read access to the location's call tree.
    pub fn with_tree<R>(&self, f: impl FnOnce(&CallTree) -> R) -> R {
        f(&self.lock().tree)
    }

    pub fn same(&self, other: &Location) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> LocationData {
        LocationData::new(LocationId(0), 0, LocationKind::Cpu, None, 0).unwrap()
    }

    #[test]
    fn fresh_location_sits_on_its_root() {
        let loc = data();
        assert_eq!(loc.current, Some(loc.root));
        assert_eq!(loc.depth, 0);
        assert!(matches!(
            loc.tree.node(loc.root).kind(),
            NodeKind::ThreadRoot { thread: 0, .. }
        ));
    }

    #[test]
    fn fork_lookup_skips_later_sequences() {
        let mut loc = data();
        let root = loc.root;
        let a = loc.local_ref(root);
        let b = ForkRef {
            location: LocationId(5),
            node: root,
        };
        loc.add_fork_point(a, 1, 1);
        loc.add_fork_point(b, 3, 4);

        assert_eq!(loc.fork_node(4), Some(b));
        assert_eq!(loc.fork_depth(4), 3);
        assert_eq!(loc.fork_node(2), Some(a), "sequence 2 falls back to fork 1");
        assert_eq!(loc.fork_node(0), None);
        assert_eq!(loc.fork_depth(0), 0);

        loc.remove_fork_point();
        assert_eq!(loc.fork_node(4), Some(a), "join pops the newest fork");
    }

    #[test]
    fn recycler_prefers_local_then_foreign_then_exchange() {
        let exchange = Exchange::default();
        let mut pool: Recycler<u32> = Recycler::default();
        pool.release(1, false, &exchange, 10, "test");
        pool.release(2, true, &exchange, 10, "test");
        assert_eq!(pool.recycle(&exchange), Some(2));
        assert_eq!(pool.recycle(&exchange), Some(1));
        assert_eq!(pool.recycle(&exchange), None);
    }

    #[test]
    fn foreign_overflow_flows_back_to_exchange() {
        let exchange = Exchange::default();
        let mut releaser: Recycler<u32> = Recycler::default();
        for i in 0..3 {
            releaser.release(i, false, &exchange, 2, "test");
        }
        assert_eq!(releaser.foreign_len(), 0, "backflow empties the foreign list");
        assert_eq!(exchange.len(), 3);

        let mut other: Recycler<u32> = Recycler::default();
        assert!(other.recycle(&exchange).is_some());
        assert!(exchange.is_empty(), "the whole batch moves at once");
        assert!(other.recycle(&exchange).is_some());
        assert!(other.recycle(&exchange).is_some());
        assert_eq!(other.recycle(&exchange), None);
    }

    #[test]
    fn finalize_keeps_only_the_root() {
        let mut loc = data();
        let root = loc.root;
        loc.tree
            .find_or_create_child(root, NodeKind::region(crate::RegionHandle(1)), 0)
            .unwrap();
        loc.depth = 3;
        loc.finalize().unwrap();
        assert_eq!(loc.tree.len(), 1);
        assert_eq!(loc.depth, 0);
        assert_eq!(loc.epoch, 1);
        assert_eq!(loc.current, Some(loc.root));
    }
}
