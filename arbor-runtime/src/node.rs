//! Call-tree arena.
//!
//! A `CallTree` owns every node of one location (or, after consolidation, of
//! the whole forest). Nodes are addressed by `NodeId` indices and linked as
//! parent / first-child / next-sibling chains. Released nodes and sparse
//! records go to per-arena free lists and are reused by later allocations.
//!
//! Sibling lookup is a linear scan with `NodeKind::same_position`; new
//! children are prepended. Nothing downstream may rely on sibling order
//! matching arrival order.

use std::collections::HashMap;

use crate::definitions::{CallpathHandle, LocationId, MetricHandle};
use crate::error::Error;
use crate::metric::{DenseMetric, SparseRecord, SparseValue, TriggerScheme};
use crate::node_type::{ForkRef, NodeKind};

/// Placeholder for "no enter seen yet".
pub const NO_TIMESTAMP: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().map(NodeId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SparseId(u32);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        const MPI_IN_SUBTREE = 1 << 0;
        /// Anchor of at least one fork.
        const IS_FORK_NODE = 1 << 1;
        const IN_UNTIED_TASK = 1 << 2;
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) callpath: Option<CallpathHandle>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) first_child: Option<NodeId>,
    pub(crate) next_sibling: Option<NodeId>,
    pub(crate) inclusive_time: DenseMetric,
    pub(crate) dense_metrics: Vec<DenseMetric>,
    pub(crate) first_int: Option<SparseId>,
    pub(crate) first_double: Option<SparseId>,
    pub(crate) count: u64,
    pub(crate) hits: u64,
    pub(crate) first_enter_time: u64,
    pub(crate) last_exit_time: u64,
    pub(crate) flags: NodeFlags,
}

impl Node {
    fn new(kind: NodeKind, parent: Option<NodeId>, timestamp: u64, dense_count: usize) -> Self {
        Self {
            kind,
            callpath: None,
            parent,
            first_child: None,
            next_sibling: None,
            inclusive_time: DenseMetric::new(),
            dense_metrics: vec![DenseMetric::new(); dense_count],
            first_int: None,
            first_double: None,
            count: 0,
            hits: 0,
            first_enter_time: timestamp,
            last_exit_time: timestamp,
            flags: NodeFlags::default(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
    pub fn callpath(&self) -> Option<CallpathHandle> {
        self.callpath
    }
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
    pub fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }
    pub fn next_sibling(&self) -> Option<NodeId> {
        self.next_sibling
    }
    pub fn inclusive_time(&self) -> &DenseMetric {
        &self.inclusive_time
    }
    pub fn dense_metrics(&self) -> &[DenseMetric] {
        &self.dense_metrics
    }
    pub fn count(&self) -> u64 {
        self.count
    }
    pub fn hits(&self) -> u64 {
        self.hits
    }
    pub fn first_enter_time(&self) -> u64 {
        self.first_enter_time
    }
    pub fn last_exit_time(&self) -> u64 {
        self.last_exit_time
    }
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }
    pub fn is_fork_node(&self) -> bool {
        self.flags.contains(NodeFlags::IS_FORK_NODE)
    }
    pub fn in_untied_task(&self) -> bool {
        self.flags.contains(NodeFlags::IN_UNTIED_TASK)
    }
}

/// Arena-independent copy of a node's identity and dense state. Untied task
/// continuations travel between locations in this form.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub kind: NodeKind,
    pub inclusive_time: DenseMetric,
    pub dense_metrics: Vec<DenseMetric>,
    pub count: u64,
    pub hits: u64,
    pub first_enter_time: u64,
    pub last_exit_time: u64,
    pub flags: NodeFlags,
}

#[derive(Debug, Clone)]
struct SparseSlot<V> {
    record: SparseRecord<V>,
    next: Option<SparseId>,
}

#[derive(Debug, Clone)]
struct SparseSlab<V> {
    slots: Vec<SparseSlot<V>>,
    free: Vec<SparseId>,
}

impl<V: SparseValue> SparseSlab<V> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, record: SparseRecord<V>) -> Option<SparseId> {
        let slot = SparseSlot { record, next: None };
        if let Some(id) = self.free.pop() {
            self.slots[id.0 as usize] = slot;
            return Some(id);
        }
        let id = SparseId(u32::try_from(self.slots.len()).ok()?);
        self.slots.push(slot);
        Some(id)
    }

    fn find(&self, head: Option<SparseId>, metric: MetricHandle) -> Option<SparseId> {
        let mut cur = head;
        while let Some(id) = cur {
            let slot = &self.slots[id.0 as usize];
            if slot.record.metric == metric {
                return Some(id);
            }
            cur = slot.next;
        }
        None
    }

    fn tail(&self, head: SparseId) -> SparseId {
        let mut cur = head;
        while let Some(next) = self.slots[cur.0 as usize].next {
            cur = next;
        }
        cur
    }

    fn release_chain(&mut self, head: Option<SparseId>) {
        let mut cur = head;
        while let Some(id) = cur {
            cur = self.slots[id.0 as usize].next;
            self.free.push(id);
        }
    }

    fn iter(&self, head: Option<SparseId>) -> SparseIter<'_, V> {
        SparseIter { slab: self, next: head }
    }
}

pub struct SparseIter<'a, V> {
    slab: &'a SparseSlab<V>,
    next: Option<SparseId>,
}

impl<'a, V> Iterator for SparseIter<'a, V> {
    type Item = &'a SparseRecord<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let slot = &self.slab.slots[id.0 as usize];
        self.next = slot.next;
        Some(&slot.record)
    }
}

/// Iterator over a sibling chain.
pub struct Siblings<'a> {
    tree: &'a CallTree,
    next: Option<NodeId>,
}

impl Iterator for Siblings<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.tree.node(id).next_sibling;
        Some(id)
    }
}

#[derive(Debug, Clone)]
pub struct CallTree {
    owner: LocationId,
    nodes: Vec<Node>,
    free_nodes: Vec<NodeId>,
    ints: SparseSlab<u64>,
    doubles: SparseSlab<f64>,
    dense_count: usize,
    first_root: Option<NodeId>,
    fork_moves: Vec<(NodeId, NodeId)>,
    /// Slots the arena may hold, released ones included.
    pub(crate) node_limit: usize,
}

impl CallTree {
    /// Empty arena whose nodes carry `dense_count` dense metric slots.
    /// Allocation failures are reported against `owner`.
    pub fn new(owner: LocationId, dense_count: usize) -> Self {
        Self {
            owner,
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            ints: SparseSlab::new(),
            doubles: SparseSlab::new(),
            dense_count,
            first_root: None,
            fork_moves: Vec::new(),
            node_limit: u32::MAX as usize,
        }
    }

    pub fn owner(&self) -> LocationId {
        self.owner
    }

    pub fn dense_count(&self) -> usize {
        self.dense_count
    }

    /// Change the number of dense slots of every node, existing ones included.
    pub fn set_dense_count(&mut self, dense_count: usize) {
        self.dense_count = dense_count;
        for node in &mut self.nodes {
            node.dense_metrics.resize(dense_count, DenseMetric::new());
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Number of live (allocated and not released) nodes.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn children(&self, parent: NodeId) -> Siblings<'_> {
        Siblings {
            tree: self,
            next: self.node(parent).first_child,
        }
    }

    /// Top-level chain of the arena (thread roots of a consolidated forest).
    pub fn roots(&self) -> Siblings<'_> {
        Siblings {
            tree: self,
            next: self.first_root,
        }
    }

    pub fn first_root(&self) -> Option<NodeId> {
        self.first_root
    }

    pub fn int_metrics(&self, node: NodeId) -> SparseIter<'_, u64> {
        self.ints.iter(self.node(node).first_int)
    }

    pub fn double_metrics(&self, node: NodeId) -> SparseIter<'_, f64> {
        self.doubles.iter(self.node(node).first_double)
    }

    fn exhausted(&self) -> Error {
        Error::ArenaExhausted {
            location: self.owner,
        }
    }

    /// Allocate a node, reusing a released slot when one exists. The node
    /// is not linked into any child list.
    pub fn create_node(
        &mut self,
        parent: Option<NodeId>,
        kind: NodeKind,
        timestamp: u64,
        untied: bool,
    ) -> Result<NodeId, Error> {
        let mut node = Node::new(kind, parent, timestamp, self.dense_count);
        if untied {
            node.flags.insert(NodeFlags::IN_UNTIED_TASK);
        }
        if let Some(id) = self.free_nodes.pop() {
            self.nodes[id.index()] = node;
            return Ok(id);
        }
        if self.nodes.len() >= self.node_limit {
            return Err(self.exhausted());
        }
        let id = NodeId::from_index(self.nodes.len()).ok_or_else(|| self.exhausted())?;
        self.nodes.push(node);
        Ok(id)
    }

    /// Prepend `child` to the children of `parent`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        let head = self.node(parent).first_child;
        let c = self.node_mut(child);
        c.parent = Some(parent);
        c.next_sibling = head;
        self.node_mut(parent).first_child = Some(child);
    }

    /// Prepend `node` to the top-level chain.
    pub fn add_root(&mut self, node: NodeId) {
        let head = self.first_root;
        let n = self.node_mut(node);
        n.parent = None;
        n.next_sibling = head;
        self.first_root = Some(node);
    }

    /// Link `node` into the top-level chain right after `after`.
    pub fn insert_root_after(&mut self, after: NodeId, node: NodeId) {
        let next = self.node(after).next_sibling;
        let n = self.node_mut(node);
        n.parent = None;
        n.next_sibling = next;
        self.node_mut(after).next_sibling = Some(node);
    }

    pub fn find_child(&self, parent: NodeId, kind: &NodeKind) -> Option<NodeId> {
        self.children(parent)
            .find(|&c| self.node(c).kind.same_position(kind))
    }

    pub fn find_root(&self, kind: &NodeKind) -> Option<NodeId> {
        self.roots().find(|&c| self.node(c).kind.same_position(kind))
    }

    /// Return the child of `parent` matching `kind`, creating and prepending
    /// it when there is none. A created node inherits the untied-task context
    /// of its parent.
    pub fn find_or_create_child(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        timestamp: u64,
    ) -> Result<NodeId, Error> {
        if let Some(found) = self.find_child(parent, &kind) {
            return Ok(found);
        }
        let untied = self.node(parent).in_untied_task();
        let child = self.create_node(Some(parent), kind, timestamp, untied)?;
        self.add_child(parent, child);
        Ok(child)
    }

    /// Unlink `node` from its parent's child list (or from the top-level
    /// chain). Its own subtree stays attached to it.
    pub fn remove_node(&mut self, node: NodeId) {
        let parent = self.node(node).parent;
        let next = self.node(node).next_sibling;
        let head = match parent {
            Some(p) => self.node(p).first_child,
            None => self.first_root,
        };
        if head == Some(node) {
            match parent {
                Some(p) => self.node_mut(p).first_child = next,
                None => self.first_root = next,
            }
        } else {
            let mut cur = head;
            while let Some(c) = cur {
                if self.node(c).next_sibling == Some(node) {
                    self.node_mut(c).next_sibling = next;
                    break;
                }
                cur = self.node(c).next_sibling;
            }
        }
        let n = self.node_mut(node);
        n.parent = None;
        n.next_sibling = None;
    }

    /// Append all children of `source` to the end of the child list of
    /// `destination`, or to the top-level chain when `destination` is `None`.
    pub fn move_children(&mut self, destination: Option<NodeId>, source: NodeId) {
        let Some(first) = self.node(source).first_child else {
            return;
        };
        let mut cur = Some(first);
        while let Some(c) = cur {
            self.node_mut(c).parent = destination;
            cur = self.node(c).next_sibling;
        }
        self.node_mut(source).first_child = None;

        let head = match destination {
            Some(d) => self.node(d).first_child,
            None => self.first_root,
        };
        match head {
            None => match destination {
                Some(d) => self.node_mut(d).first_child = Some(first),
                None => self.first_root = Some(first),
            },
            Some(h) => {
                let mut last = h;
                while let Some(next) = self.node(last).next_sibling {
                    last = next;
                }
                self.node_mut(last).next_sibling = Some(first);
            }
        }
    }

    /// Pre-order ids of the subtree rooted in `root`.
    pub fn preorder(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            let start = stack.len();
            stack.extend(self.children(id));
            stack[start..].reverse();
        }
        out
    }

    /// Visit every node of the subtree in pre-order. The visitor may change
    /// node data but not the links.
    pub fn for_all(&mut self, root: NodeId, mut visit: impl FnMut(NodeId, &mut Node)) {
        for id in self.preorder(root) {
            visit(id, &mut self.nodes[id.index()]);
        }
    }

    /// Depth of `node` below the top of its tree (a root has depth 0).
    pub fn depth_of(&self, node: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = self.node(node).parent;
        while let Some(p) = cur {
            depth += 1;
            cur = self.node(p).parent;
        }
        depth
    }

    /// Topmost ancestor of `node` (the node itself for a root).
    pub fn top_of(&self, node: NodeId) -> NodeId {
        let mut cur = node;
        while let Some(p) = self.node(cur).parent {
            cur = p;
        }
        cur
    }

    pub fn number_of_children(&self, node: NodeId) -> usize {
        self.children(node).count()
    }

    pub fn child_calls(&self, node: NodeId) -> u64 {
        self.children(node).map(|c| self.node(c).count).sum()
    }

    /// Inclusive time minus the inclusive time of all children.
    pub fn exclusive_time(&self, node: NodeId) -> u64 {
        self.children(node).fold(self.node(node).inclusive_time.sum, |acc, c| {
            acc.wrapping_sub(self.node(c).inclusive_time.sum)
        })
    }

    pub fn subtract_node(&mut self, minuend: NodeId, subtrahend: NodeId) {
        let sub = self.node(subtrahend).clone();
        let m = self.node_mut(minuend);
        m.count = m.count.saturating_sub(sub.count);
        m.inclusive_time.subtract(&sub.inclusive_time);
        for (dst, src) in m.dense_metrics.iter_mut().zip(&sub.dense_metrics) {
            dst.subtract(src);
        }
    }

    /// Merge timestamps and dense metrics of `source` into `destination`,
    /// leaving the visit count alone.
    pub fn merge_node_inclusive(&mut self, destination: NodeId, source: NodeId) {
        let (inclusive, dense, first, last) = {
            let s = self.node(source);
            (
                s.inclusive_time,
                s.dense_metrics.clone(),
                s.first_enter_time,
                s.last_exit_time,
            )
        };
        let d = self.node_mut(destination);
        d.first_enter_time = d.first_enter_time.min(first);
        if d.last_exit_time == NO_TIMESTAMP || (last != NO_TIMESTAMP && last > d.last_exit_time) {
            d.last_exit_time = last;
        }
        d.inclusive_time.merge(&inclusive);
        for (dst, src) in d.dense_metrics.iter_mut().zip(&dense) {
            dst.merge(src);
        }
    }

    pub fn merge_node_dense(&mut self, destination: NodeId, source: NodeId) {
        let (count, hits) = {
            let s = self.node(source);
            (s.count, s.hits)
        };
        let d = self.node_mut(destination);
        d.count += count;
        d.hits += hits;
        self.merge_node_inclusive(destination, source);
    }

    pub fn merge_node_sparse(&mut self, destination: NodeId, source: NodeId) -> Result<(), Error> {
        let ints: Vec<SparseRecord<u64>> = self.int_metrics(source).copied().collect();
        let doubles: Vec<SparseRecord<f64>> = self.double_metrics(source).copied().collect();
        self.merge_sparse_records(destination, ints, doubles)
    }

    fn merge_sparse_records(
        &mut self,
        destination: NodeId,
        ints: Vec<SparseRecord<u64>>,
        doubles: Vec<SparseRecord<f64>>,
    ) -> Result<(), Error> {
        for record in ints {
            let head = self.node(destination).first_int;
            match self.ints.find(head, record.metric) {
                Some(id) => self.ints.slots[id.0 as usize].record.merge(&record),
                None => {
                    let id = self.ints.alloc(record).ok_or_else(|| self.exhausted())?;
                    self.ints.slots[id.0 as usize].next = head;
                    self.node_mut(destination).first_int = Some(id);
                }
            }
        }
        for record in doubles {
            let head = self.node(destination).first_double;
            match self.doubles.find(head, record.metric) {
                Some(id) => self.doubles.slots[id.0 as usize].record.merge(&record),
                None => {
                    let id = self.doubles.alloc(record).ok_or_else(|| self.exhausted())?;
                    self.doubles.slots[id.0 as usize].next = head;
                    self.node_mut(destination).first_double = Some(id);
                }
            }
        }
        Ok(())
    }

    /// Copy the subtree of `source` from another arena into this one, below
    /// `parent` or unlinked. Every copied id is recorded in `map`. Sibling
    /// order is preserved.
    pub fn import_subtree(
        &mut self,
        parent: Option<NodeId>,
        other: &CallTree,
        source: NodeId,
        map: &mut HashMap<NodeId, NodeId>,
    ) -> Result<NodeId, Error> {
        let id = self.create_from_data(parent, &other.node_data(source))?;
        self.node_mut(id).callpath = other.node(source).callpath;
        let ints = other.int_metrics(source).copied().collect();
        let doubles = other.double_metrics(source).copied().collect();
        self.merge_sparse_records(id, ints, doubles)?;
        map.insert(source, id);
        let kids: Vec<NodeId> = other.children(source).collect();
        for &kid in kids.iter().rev() {
            self.import_subtree(Some(id), other, kid, map)?;
        }
        Ok(id)
    }

    /// Fold the subtree of `source` into the subtree of `destination`,
    /// matching children by identity, and release what is left of `source`.
    ///
    /// When `source` is a fork anchor, the move is logged so thread starts
    /// that point at it can be redirected to `destination`.
    pub fn merge_subtree(&mut self, destination: NodeId, source: NodeId) -> Result<(), Error> {
        if self.node(source).is_fork_node() {
            self.fork_moves.push((source, destination));
        }
        self.merge_node_dense(destination, source);
        self.merge_node_sparse(destination, source)?;
        let flags = self.node(source).flags;
        self.node_mut(destination).flags.insert(flags);

        let mut child = self.node(source).first_child;
        while let Some(c) = child {
            child = self.node(c).next_sibling;
            match self.find_child(destination, &self.node(c).kind) {
                None => self.add_child(destination, c),
                Some(matching) => self.merge_subtree(matching, c)?,
            }
        }
        self.node_mut(source).first_child = None;
        self.release_subtree(source);
        Ok(())
    }

    /// Return the subtree's nodes and sparse records to the free lists.
    /// Fork anchors keep their slot so references to them stay unambiguous.
    pub fn release_subtree(&mut self, root: NodeId) {
        let mut child = self.node(root).first_child;
        while let Some(c) = child {
            child = self.node(c).next_sibling;
            self.release_subtree(c);
        }
        let node = self.node_mut(root);
        let ints = node.first_int.take();
        let doubles = node.first_double.take();
        node.first_child = None;
        node.next_sibling = None;
        node.parent = None;
        let keep = node.is_fork_node();
        self.ints.release_chain(ints);
        self.doubles.release_chain(doubles);
        if !keep {
            self.free_nodes.push(root);
        }
    }

    /// Copy of `source` with its dense state and sparse records, unlinked.
    pub fn copy_node(&mut self, source: NodeId) -> Result<NodeId, Error> {
        let data = self.node_data(source);
        let id = self.create_from_data(None, &data)?;
        self.merge_node_sparse(id, source)?;
        Ok(id)
    }

    pub fn node_data(&self, node: NodeId) -> NodeData {
        let n = self.node(node);
        NodeData {
            kind: n.kind.clone(),
            inclusive_time: n.inclusive_time,
            dense_metrics: n.dense_metrics.clone(),
            count: n.count,
            hits: n.hits,
            first_enter_time: n.first_enter_time,
            last_exit_time: n.last_exit_time,
            flags: n.flags,
        }
    }

    /// Materialize `data` in this arena, as a child of `parent` if given.
    pub fn create_from_data(
        &mut self,
        parent: Option<NodeId>,
        data: &NodeData,
    ) -> Result<NodeId, Error> {
        let id = self.create_node(parent, data.kind.clone(), data.first_enter_time, false)?;
        let dense_count = self.dense_count;
        let n = self.node_mut(id);
        n.inclusive_time = data.inclusive_time;
        n.dense_metrics = data.dense_metrics.clone();
        n.dense_metrics.resize(dense_count, DenseMetric::new());
        n.count = data.count;
        n.hits = data.hits;
        n.last_exit_time = data.last_exit_time;
        n.flags = data.flags;
        if let Some(p) = parent {
            self.add_child(p, id);
        }
        Ok(id)
    }

    /// Sort every sibling chain of the subtree so that `less(a, b)` puts
    /// `a` first. Equal nodes keep their relative order.
    pub fn sort_subtree(&mut self, root: NodeId, less: &impl Fn(&Node, &Node) -> bool) {
        let mut kids: Vec<NodeId> = self.children(root).collect();
        if kids.len() > 1 {
            kids.sort_by(|&a, &b| order(less, self.node(a), self.node(b)));
            self.relink(Some(root), &kids);
        }
        for kid in kids {
            self.sort_subtree(kid, less);
        }
    }

    /// Sort only the top-level chain.
    pub fn sort_roots(&mut self, less: &impl Fn(&Node, &Node) -> bool) {
        let mut roots: Vec<NodeId> = self.roots().collect();
        roots.sort_by(|&a, &b| order(less, self.node(a), self.node(b)));
        self.relink(None, &roots);
    }

    fn relink(&mut self, parent: Option<NodeId>, ordered: &[NodeId]) {
        let head = ordered.first().copied();
        match parent {
            Some(p) => self.node_mut(p).first_child = head,
            None => self.first_root = head,
        }
        for pair in ordered.windows(2) {
            self.node_mut(pair[0]).next_sibling = Some(pair[1]);
        }
        if let Some(&last) = ordered.last() {
            self.node_mut(last).next_sibling = None;
        }
    }

    pub fn trigger_int(
        &mut self,
        node: NodeId,
        metric: MetricHandle,
        value: u64,
        scheme: TriggerScheme,
    ) -> Result<(), Error> {
        let head = self.node(node).first_int;
        if let Some(id) = self.ints.find(head, metric) {
            return self.ints.slots[id.0 as usize].record.update(value, scheme);
        }
        let record = SparseRecord::create(metric, value, scheme)?;
        let id = self.ints.alloc(record).ok_or_else(|| self.exhausted())?;
        match head {
            None => self.node_mut(node).first_int = Some(id),
            Some(h) => {
                let tail = self.ints.tail(h);
                self.ints.slots[tail.0 as usize].next = Some(id);
            }
        }
        Ok(())
    }

    pub fn trigger_double(
        &mut self,
        node: NodeId,
        metric: MetricHandle,
        value: f64,
        scheme: TriggerScheme,
    ) -> Result<(), Error> {
        let head = self.node(node).first_double;
        if let Some(id) = self.doubles.find(head, metric) {
            return self.doubles.slots[id.0 as usize].record.update(value, scheme);
        }
        let record = SparseRecord::create(metric, value, scheme)?;
        let id = self.doubles.alloc(record).ok_or_else(|| self.exhausted())?;
        match head {
            None => self.node_mut(node).first_double = Some(id),
            Some(h) => {
                let tail = self.doubles.tail(h);
                self.doubles.slots[tail.0 as usize].next = Some(id);
            }
        }
        Ok(())
    }

    /// The thread start among the children of `root` that was forked at `fork`.
    pub fn thread_start_for_fork(&self, root: NodeId, fork: ForkRef) -> Option<NodeId> {
        self.children(root)
            .find(|&c| self.node(c).kind.fork() == Some(fork))
    }

    /// Fork anchors merged away during measurement, as `(old, new)` pairs in
    /// the order the merges happened.
    pub fn fork_moves(&self) -> &[(NodeId, NodeId)] {
        &self.fork_moves
    }
}

fn order<F: Fn(&Node, &Node) -> bool>(less: &F, a: &Node, b: &Node) -> std::cmp::Ordering {
    if less(a, b) {
        std::cmp::Ordering::Less
    } else if less(b, a) {
        std::cmp::Ordering::Greater
    } else {
        std::cmp::Ordering::Equal
    }
}
