//! Callpath unification.
//!
//! Every region-like node gets the handle of its `(parent, region,
//! parameters)` triple. Identical triples share a handle, so one position in
//! two threads ends up with one callpath. The master thread is numbered
//! first and every tree is walked oldest-first, which keeps the numbering
//! stable across runs.

use super::Forest;
use crate::definitions::{CallpathHandle, Definitions};
use crate::error::Error;
use crate::node::{CallTree, Node, NodeId};
use crate::node_type::NodeKind;

pub(super) fn assign(forest: &mut Forest, defs: &dyn Definitions) -> Result<(), Error> {
    let roots: Vec<NodeId> = forest.locations.iter().map(|l| l.root).collect();
    for &root in &roots {
        forest.tree.sort_subtree(root, &|a: &Node, b: &Node| {
            a.first_enter_time < b.first_enter_time
        });
    }
    for root in roots {
        for node in forest.tree.preorder(root) {
            assign_callpath(&mut forest.tree, defs, node)?;
        }
    }
    Ok(())
}

fn assign_callpath(tree: &mut CallTree, defs: &dyn Definitions, node: NodeId) -> Result<(), Error> {
    let parent_path = match tree.node(node).parent() {
        None => None,
        Some(p) if matches!(tree.node(p).kind(), NodeKind::ThreadRoot { .. }) => None,
        Some(p) => tree.node(p).callpath(),
    };
    let callpath: Option<CallpathHandle> = match tree.node(node).kind() {
        NodeKind::ThreadRoot { .. } => None,
        NodeKind::TaskRoot { region } => Some(defs.new_callpath(parent_path, *region, &[])),
        NodeKind::RegularRegion { region, parameters } => Some(defs.new_callpath(
            parent_path,
            *region,
            parameters.as_deref().unwrap_or(&[]),
        )),
        other => return Err(Error::UnexpectedNode(other.node_type().name())),
    };
    tree.node_mut(node).callpath = callpath;
    Ok(())
}
