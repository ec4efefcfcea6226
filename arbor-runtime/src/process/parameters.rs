//! Parameter reorganization.
//!
//! During measurement a parameter is a child node of the region it was set
//! in. Afterwards every parameter path below a region becomes a sibling of
//! that region carrying the parameter list, so `foo` with `size=4` ends up
//! next to plain `foo` instead of below it. The "instance" parameter of
//! dynamic regions is special: each instance becomes a region of its own.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::Forest;
use crate::definitions::{
    CallpathParameter, Definitions, ParameterHandle, ParameterValue, RegionHandle, RegionType,
};
use crate::node::{CallTree, NodeId};
use crate::node_type::NodeKind;

pub(super) fn process(forest: &mut Forest, defs: &dyn Definitions, instance: ParameterHandle) {
    let roots: Vec<NodeId> = forest.locations.iter().map(|l| l.root).collect();
    let mut instances = HashMap::new();
    for root in roots {
        name_instances(&mut forest.tree, defs, instance, &mut instances, root);
        reorganize_children(&mut forest.tree, root);
    }
}

fn name_instances(
    tree: &mut CallTree,
    defs: &dyn Definitions,
    instance: ParameterHandle,
    regions: &mut HashMap<i64, RegionHandle>,
    root: NodeId,
) {
    for node in tree.preorder(root) {
        let NodeKind::ParameterInteger { parameter, value } = *tree.node(node).kind() else {
            continue;
        };
        if parameter != instance {
            continue;
        }
        let region = *regions
            .entry(value)
            .or_insert_with(|| defs.new_region(&format!("instance={value}"), RegionType::User));
        let count = tree.node(node).count;
        let n = tree.node_mut(node);
        n.kind = NodeKind::region(region);
        if let Some(parent) = n.parent {
            let p = tree.node_mut(parent);
            p.count = p.count.saturating_sub(count);
        }
    }
}

fn as_callpath_parameter(kind: &NodeKind) -> Option<CallpathParameter> {
    match *kind {
        NodeKind::ParameterInteger { parameter, value } => Some(CallpathParameter {
            parameter,
            value: ParameterValue::Int(value),
        }),
        NodeKind::ParameterString { parameter, value } => Some(CallpathParameter {
            parameter,
            value: ParameterValue::String(value),
        }),
        _ => None,
    }
}

fn parameter_children(tree: &CallTree, node: NodeId) -> Vec<NodeId> {
    tree.children(node)
        .filter(|&c| tree.node(c).kind().is_parameter())
        .collect()
}

fn reorganize_children(tree: &mut CallTree, parent: NodeId) {
    let children: Vec<NodeId> = tree.children(parent).collect();
    for child in children {
        if parameter_children(tree, child).is_empty() {
            reorganize_children(tree, child);
            continue;
        }
        match tree.node(child).kind() {
            NodeKind::RegularRegion { region, .. } => {
                let region = *region;
                tree.remove_node(child);
                expand_parameters(tree, child, parent, region, &[]);
            }
            kind => {
                warn!(
                    node_type = %kind.node_type(),
                    "parameters outside of a region are folded into their parent"
                );
                for param in parameter_children(tree, child) {
                    tree.remove_node(param);
                    splice_children(tree, child, param);
                }
                reorganize_children(tree, child);
            }
        }
    }
}

/// Turn `current`, reached through `parameters`, into a sibling visit of
/// `region` below `parent`, and recurse into its parameter children.
fn expand_parameters(
    tree: &mut CallTree,
    current: NodeId,
    parent: NodeId,
    region: RegionHandle,
    parameters: &[CallpathParameter],
) {
    for param in parameter_children(tree, current) {
        tree.subtract_node(current, param);
        tree.remove_node(param);
        let mut path = parameters.to_vec();
        path.extend(as_callpath_parameter(tree.node(param).kind()));
        expand_parameters(tree, param, parent, region, &path);
    }

    if tree.node(current).count == 0 && tree.node(current).first_child.is_none() {
        tree.release_subtree(current);
        return;
    }
    tree.node_mut(current).kind = NodeKind::RegularRegion {
        region,
        parameters: (!parameters.is_empty()).then(|| Arc::from(parameters)),
    };
    tree.add_child(parent, current);
    reorganize_children(tree, current);
}

/// Move the children of `source` below `destination`, folding each into a
/// matching child when there is one.
fn splice_children(tree: &mut CallTree, destination: NodeId, source: NodeId) {
    let children: Vec<NodeId> = tree.children(source).collect();
    for child in children {
        tree.remove_node(child);
        let matching = tree.find_child(destination, tree.node(child).kind());
        match matching {
            Some(m) => {
                if let Err(e) = tree.merge_subtree(m, child) {
                    warn!("could not merge parameter subtree: {e}");
                }
            }
            None => tree.add_child(destination, child),
        }
    }
    tree.release_subtree(source);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{LocationId, LocationKind, ParameterType, Registry};
    use crate::process::LocationInfo;

    fn forest() -> (Forest, NodeId) {
        let mut tree = CallTree::new(LocationId(0), 0);
        let kind = NodeKind::ThreadRoot {
            location: LocationId(0),
            thread: 0,
        };
        let root = tree.create_node(None, kind, 0, false).unwrap();
        tree.add_root(root);
        let forest = Forest {
            tree,
            dense_metrics: Vec::new(),
            locations: vec![LocationInfo {
                location: LocationId(0),
                thread: 0,
                kind: LocationKind::Cpu,
                root,
            }],
        };
        (forest, root)
    }

    fn visit(tree: &mut CallTree, parent: NodeId, kind: NodeKind, count: u64, time: u64) -> NodeId {
        let node = tree.find_or_create_child(parent, kind, 0).unwrap();
        let n = tree.node_mut(node);
        n.count = count;
        n.inclusive_time.sum = time;
        node
    }

    #[test]
    fn parameter_paths_become_sibling_regions() {
        let defs = Registry::shared();
        let foo = defs.new_region("foo", RegionType::Function);
        let size = defs.new_parameter("size", ParameterType::Int64);
        let (mut forest, root) = forest();
        let t = &mut forest.tree;
        let f = visit(t, root, NodeKind::region(foo), 3, 30);
        visit(
            t,
            f,
            NodeKind::ParameterInteger {
                parameter: size,
                value: 4,
            },
            2,
            20,
        );

        process(&mut forest, defs.as_ref(), defs.new_parameter("instance", ParameterType::Int64));

        let t = forest.tree();
        let kids: Vec<NodeId> = t.children(root).collect();
        assert_eq!(kids.len(), 2);
        let plain = forest.child_region(root, foo).unwrap();
        assert_eq!(t.node(plain).count(), 1);
        assert_eq!(t.node(plain).inclusive_time().sum, 10);
        let with_size = kids.into_iter().find(|&k| k != plain).unwrap();
        match t.node(with_size).kind() {
            NodeKind::RegularRegion {
                region,
                parameters: Some(params),
            } => {
                assert_eq!(*region, foo);
                assert_eq!(
                    params.as_ref(),
                    &[CallpathParameter {
                        parameter: size,
                        value: ParameterValue::Int(4)
                    }]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.node(with_size).inclusive_time().sum, 20);
    }

    #[test]
    fn fully_parameterized_region_leaves_no_plain_visit() {
        let defs = Registry::shared();
        let foo = defs.new_region("foo", RegionType::Function);
        let size = defs.new_parameter("size", ParameterType::Int64);
        let (mut forest, root) = forest();
        let t = &mut forest.tree;
        let f = visit(t, root, NodeKind::region(foo), 2, 20);
        for value in [1, 2] {
            visit(
                t,
                f,
                NodeKind::ParameterInteger {
                    parameter: size,
                    value,
                },
                1,
                10,
            );
        }

        process(&mut forest, defs.as_ref(), defs.new_parameter("instance", ParameterType::Int64));

        assert!(forest.child_region(root, foo).is_none());
        assert_eq!(forest.tree().children(root).count(), 2);
    }

    #[test]
    fn instances_become_named_regions() {
        let defs = Registry::shared();
        let step = defs.new_region("step", RegionType::Dynamic);
        let instance = defs.new_parameter("instance", ParameterType::Int64);
        let (mut forest, root) = forest();
        let t = &mut forest.tree;
        let s = visit(t, root, NodeKind::region(step), 2, 20);
        for value in [1, 2] {
            visit(
                t,
                s,
                NodeKind::ParameterInteger {
                    parameter: instance,
                    value,
                },
                1,
                10,
            );
        }

        process(&mut forest, defs.as_ref(), instance);

        let t = forest.tree();
        let s = forest.child_region(root, step).unwrap();
        assert_eq!(t.node(s).count(), 0);
        let names: Vec<String> = t
            .children(s)
            .filter_map(|c| t.node(c).kind().region_handle())
            .map(|r| defs.region_name(r))
            .collect();
        assert_eq!(names, vec!["instance=2", "instance=1"]);
    }
}
