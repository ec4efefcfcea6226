//! Phase extraction: phase regions are cut out of their callpath and become
//! top-level children of their thread root.

use tracing::warn;

use super::Forest;
use crate::definitions::Definitions;
use crate::node::{CallTree, NodeId};
use crate::node_type::NodeKind;

pub(super) fn process(forest: &mut Forest, defs: &dyn Definitions) {
    let roots: Vec<NodeId> = forest.locations.iter().map(|l| l.root).collect();
    for root in roots {
        // Reverse pre-order puts nested phases before the phases around them.
        for node in forest.tree.preorder(root).into_iter().rev() {
            if is_nested_phase(&forest.tree, defs, node) {
                extract(&mut forest.tree, root, node);
            }
        }
    }
}

fn is_nested_phase(tree: &CallTree, defs: &dyn Definitions, node: NodeId) -> bool {
    match tree.node(node).kind() {
        NodeKind::RegularRegion { region, .. } => {
            defs.region_type(*region).is_phase() && tree.depth_of(node) > 1
        }
        _ => false,
    }
}

fn extract(tree: &mut CallTree, root: NodeId, phase: NodeId) {
    let inclusive = *tree.node(phase).inclusive_time();
    let dense = tree.node(phase).dense_metrics().to_vec();
    let mut ancestor = tree.node(phase).parent();
    while let Some(a) = ancestor {
        if a == root {
            break;
        }
        let n = tree.node_mut(a);
        n.inclusive_time.subtract(&inclusive);
        for (dst, src) in n.dense_metrics.iter_mut().zip(&dense) {
            dst.subtract(src);
        }
        ancestor = n.parent;
    }

    tree.remove_node(phase);
    match tree.find_child(root, tree.node(phase).kind()) {
        Some(existing) => {
            if let Err(e) = tree.merge_subtree(existing, phase) {
                warn!("could not merge phase into its top-level node: {e}");
            }
        }
        None => tree.add_child(root, phase),
    }
}
