//! Collapse nodes become visits of one artificial `COLLAPSE` region.

use tracing::debug;

use super::Forest;
use crate::definitions::{Definitions, RegionType};
use crate::node_type::NodeKind;

pub(super) const COLLAPSE_REGION_NAME: &str = "COLLAPSE";

pub(super) fn substitute(forest: &mut Forest, defs: &dyn Definitions) {
    let region = defs.new_region(COLLAPSE_REGION_NAME, RegionType::Artificial);
    let roots: Vec<_> = forest.tree.roots().collect();
    let mut replaced = 0usize;
    for root in roots {
        forest.tree.for_all(root, |_, node| {
            if node.kind.is_collapse() {
                node.kind = NodeKind::region(region);
                replaced += 1;
            }
        });
    }
    debug!(replaced, "collapse nodes substituted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{LocationId, LocationKind, Registry};
    use crate::node::CallTree;
    use crate::process::LocationInfo;

    #[test]
    fn collapse_nodes_turn_into_region_visits() {
        let defs = Registry::shared();
        let mut tree = CallTree::new(LocationId(0), 0);
        let kind = NodeKind::ThreadRoot {
            location: LocationId(0),
            thread: 0,
        };
        let root = tree.create_node(None, kind, 0, false).unwrap();
        tree.add_root(root);
        let collapse = tree
            .find_or_create_child(root, NodeKind::Collapse { depth: 3 }, 0)
            .unwrap();
        let mut forest = Forest {
            tree,
            dense_metrics: Vec::new(),
            locations: vec![LocationInfo {
                location: LocationId(0),
                thread: 0,
                kind: LocationKind::Cpu,
                root,
            }],
        };

        substitute(&mut forest, defs.as_ref());
        let region = forest.tree().node(collapse).kind().region_handle().unwrap();
        assert_eq!(defs.region_name(region), COLLAPSE_REGION_NAME);
        assert_eq!(defs.region_type(region), RegionType::Artificial);
    }
}
