//! Thread start expansion and thread ordering.
//!
//! A thread start stands for "this thread was forked at node X of another
//! thread". Expansion replaces it by a copy of X's callpath, so the worker's
//! regions appear below the region that spawned them.

use tracing::warn;

use super::{Forest, merge_children};
use crate::node::{CallTree, Node, NodeId};
use crate::node_type::NodeKind;

pub(super) fn expand_threads(forest: &mut Forest) {
    let roots: Vec<NodeId> = forest.locations.iter().map(|l| l.root).collect();
    for root in roots {
        let starts: Vec<NodeId> = forest
            .tree
            .children(root)
            .filter(|&c| matches!(forest.tree.node(c).kind(), NodeKind::ThreadStart { .. }))
            .collect();
        for start in starts {
            expand_thread_start(&mut forest.tree, root, start);
        }
        sum_children(&mut forest.tree, root);
    }
}

/// The node a thread was really created at: thread starts that point at
/// other thread starts are followed to the first real node.
fn creation_point(tree: &CallTree, start: NodeId) -> Option<NodeId> {
    let mut node = tree.node(start).kind().fork().map(|f| f.node)?;
    // A chain can never be longer than the arena.
    for _ in 0..=tree.len() {
        match tree.node(node).kind() {
            NodeKind::ThreadStart { fork } => node = fork.map(|f| f.node)?,
            NodeKind::ThreadRoot { .. } => return None,
            _ => return Some(node),
        }
    }
    warn!("cyclic thread start chain");
    None
}

fn expand_thread_start(tree: &mut CallTree, root: NodeId, start: NodeId) {
    let creation = creation_point(tree, start);
    tree.remove_node(start);
    if tree.node(start).first_child().is_none() {
        tree.release_subtree(start);
        return;
    }
    let destination = match creation {
        None => root,
        Some(creation) => {
            sum_children(tree, start);
            match add_callpath(tree, root, creation, start) {
                Ok(leaf) => leaf,
                Err(e) => {
                    warn!("could not rebuild the callpath of a forked thread: {e}");
                    root
                }
            }
        }
    };
    if let Err(e) = merge_children(tree, destination, start) {
        warn!("could not merge a thread start into its callpath: {e}");
    }
    tree.release_subtree(start);
}

/// Recreate the path from the top of `creation`'s thread down to `creation`
/// below `root`. Every node on the path gets the times of `source`.
fn add_callpath(
    tree: &mut CallTree,
    root: NodeId,
    creation: NodeId,
    source: NodeId,
) -> Result<NodeId, crate::error::Error> {
    let mut path = Vec::new();
    let mut cur = Some(creation);
    while let Some(n) = cur {
        if matches!(
            tree.node(n).kind(),
            NodeKind::ThreadRoot { .. } | NodeKind::ThreadStart { .. }
        ) {
            break;
        }
        path.push(n);
        cur = tree.node(n).parent();
    }

    let mut parent = root;
    for &n in path.iter().rev() {
        let kind = tree.node(n).kind().clone();
        let first_enter = tree.node(source).first_enter_time();
        let child = tree.find_or_create_child(parent, kind, first_enter)?;
        tree.merge_node_inclusive(child, source);
        parent = child;
    }
    Ok(parent)
}

/// Inclusive times of `node` become the sum of its children's. The visit
/// count is reset since the node was never entered itself.
pub(super) fn sum_children(tree: &mut CallTree, node: NodeId) {
    let children: Vec<NodeId> = tree.children(node).collect();
    let Some((&first, rest)) = children.split_first() else {
        return;
    };
    let data = tree.node_data(first);
    let n = tree.node_mut(node);
    n.count = 0;
    n.first_enter_time = data.first_enter_time;
    n.last_exit_time = data.last_exit_time;
    n.inclusive_time.copy_from(&data.inclusive_time);
    for (dst, src) in n.dense_metrics.iter_mut().zip(&data.dense_metrics) {
        dst.copy_from(src);
    }
    for &child in rest {
        tree.merge_node_inclusive(node, child);
    }
}

/// Order thread roots by thread number, but only when the numbers are
/// exactly `0..n`.
pub(super) fn sort_threads(forest: &mut Forest) {
    let mut threads: Vec<u64> = forest.locations.iter().map(|l| l.thread).collect();
    threads.sort_unstable();
    if !threads.iter().copied().eq(0..threads.len() as u64) {
        return;
    }
    forest
        .tree
        .sort_roots(&|a: &Node, b: &Node| a.kind().less_than(b.kind()));
    forest.sync_locations();
}
