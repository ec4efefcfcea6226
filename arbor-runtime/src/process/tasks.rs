//! Task post-processing.
//!
//! Task regions are entered once per switch, so their visit count becomes
//! the "number of switches" metric. Whatever still hangs directly below a
//! thread root apart from the program region (regions of threads that were
//! never forked, and task trees) is grouped below an artificial
//! `PROGRAM` task root.

use std::collections::HashMap;

use tracing::debug;

use super::Forest;
use crate::definitions::{Definitions, LocationKind, MetricHandle, RegionHandle, RegionType};
use crate::error::Error;
use crate::metric::TriggerScheme;
use crate::node::{CallTree, NO_TIMESTAMP, NodeId};
use crate::node_type::NodeKind;
use crate::profile::Profile;

pub(super) const THREADS_REGION_NAME: &str = "THREADS";
pub(super) const KERNELS_REGION_NAME: &str = "KERNELS";
pub(super) const TASKS_REGION_NAME: &str = "TASKS";

pub(super) fn process(forest: &mut Forest, profile: &Profile) -> Result<(), Error> {
    let defs = profile.definitions();
    let switches = profile.0.reserved.switches;
    let program = defs.program_region();
    let first_enter = profile.program_begin_time().unwrap_or(NO_TIMESTAMP);

    let mut grouping = Grouping {
        defs,
        program,
        first_enter,
        artificial: HashMap::new(),
        program_root: None,
    };
    for info in forest.locations.clone() {
        count_switches(&mut forest.tree, defs, info.root, switches)?;
        let artificial = match info.kind {
            LocationKind::Cpu => THREADS_REGION_NAME,
            LocationKind::Gpu => KERNELS_REGION_NAME,
        };
        grouping.program_root = None;
        grouping.regroup(&mut forest.tree, info.root, artificial)?;
    }
    Ok(())
}

fn count_switches(
    tree: &mut CallTree,
    defs: &dyn Definitions,
    root: NodeId,
    switches: MetricHandle,
) -> Result<(), Error> {
    for node in tree.preorder(root) {
        let NodeKind::RegularRegion { region, .. } = *tree.node(node).kind() else {
            continue;
        };
        if !defs.region_type(region).is_task() {
            continue;
        }
        let count = tree.node(node).count;
        tree.trigger_int(node, switches, count, TriggerScheme::AsIs)?;
        tree.node_mut(node).count = 0;
    }
    Ok(())
}

struct Grouping<'a> {
    defs: &'a dyn Definitions,
    program: RegionHandle,
    first_enter: u64,
    artificial: HashMap<&'static str, RegionHandle>,
    program_root: Option<NodeId>,
}

impl Grouping<'_> {
    fn regroup(
        &mut self,
        tree: &mut CallTree,
        root: NodeId,
        artificial: &'static str,
    ) -> Result<(), Error> {
        let top: Vec<NodeId> = tree.children(root).collect();
        let mut moved = 0usize;
        for node in top {
            let name = match tree.node(node).kind() {
                NodeKind::RegularRegion { region, .. } if *region != self.program => artificial,
                NodeKind::TaskRoot { .. } => TASKS_REGION_NAME,
                _ => continue,
            };
            let via_program = name != TASKS_REGION_NAME;
            tree.remove_node(node);
            let program_root = self.program_root(tree)?;
            let region = self.artificial_region(name);
            let parent = tree.find_or_create_child(
                program_root,
                NodeKind::TaskRoot { region },
                self.first_enter,
            )?;
            tree.merge_node_inclusive(parent, node);
            if via_program {
                tree.merge_node_inclusive(program_root, node);
            }
            match tree.find_child(parent, tree.node(node).kind()) {
                Some(existing) => tree.merge_subtree(existing, node)?,
                None => tree.add_child(parent, node),
            }
            moved += 1;
        }
        if let Some(program_root) = self.program_root {
            tree.add_child(root, program_root);
            debug!(moved, "top-level nodes grouped below the program root");
        }
        Ok(())
    }

    fn artificial_region(&mut self, name: &'static str) -> RegionHandle {
        let defs = self.defs;
        *self
            .artificial
            .entry(name)
            .or_insert_with(|| defs.new_region(name, RegionType::Artificial))
    }

    fn program_root(&mut self, tree: &mut CallTree) -> Result<NodeId, Error> {
        if let Some(root) = self.program_root {
            return Ok(root);
        }
        let root = tree.create_node(
            None,
            NodeKind::TaskRoot {
                region: self.program,
            },
            self.first_enter,
            false,
        )?;
        self.program_root = Some(root);
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileConfig;
    use crate::definitions::{LocationId, MetricValueType, Registry};

    #[test]
    fn stray_top_level_regions_move_below_the_program_root() {
        let defs = Registry::shared();
        let profile = Profile::new(ProfileConfig::default(), defs.clone());
        let loc = profile
            .create_location(LocationId(0), 0, LocationKind::Cpu, None)
            .unwrap();
        profile.initialize(vec![]).unwrap();
        let stray = defs.new_region("stray", RegionType::Function);
        profile.enter(&loc, 10, stray, &[]).unwrap();
        profile.exit(&loc, 25, stray, &[]).unwrap();

        let forest = profile.process().unwrap();
        let root = forest.thread_root(LocationId(0)).unwrap();
        let t = forest.tree();
        let program_root = t
            .find_child(
                root,
                &NodeKind::TaskRoot {
                    region: defs.program_region(),
                },
            )
            .unwrap();
        let threads = t.children(program_root).next().unwrap();
        let NodeKind::TaskRoot { region } = *t.node(threads).kind() else {
            panic!("expected a task root");
        };
        assert_eq!(defs.region_name(region), THREADS_REGION_NAME);
        assert_eq!(t.node(program_root).inclusive_time().sum, 15);
        assert_eq!(t.node(threads).inclusive_time().sum, 15);
        assert!(forest.child_region(threads, stray).is_some());
        assert!(forest.child_region(root, stray).is_none());
    }

    #[test]
    fn task_visits_become_switch_counts() {
        let defs = Registry::shared();
        let task = defs.new_region("work", RegionType::Task);
        let mut tree = CallTree::new(LocationId(0), 0);
        let root = tree
            .create_node(
                None,
                NodeKind::ThreadRoot {
                    location: LocationId(0),
                    thread: 0,
                },
                0,
                false,
            )
            .unwrap();
        let node = tree
            .find_or_create_child(root, NodeKind::region(task), 0)
            .unwrap();
        tree.node_mut(node).count = 4;
        let switches = defs.new_metric("number of switches", MetricValueType::Uint64);

        count_switches(&mut tree, defs.as_ref(), root, switches).unwrap();

        assert_eq!(tree.node(node).count(), 0);
        let record = tree.int_metrics(node).find(|r| r.metric == switches).unwrap();
        assert_eq!(record.sum, 4);
        assert_eq!(record.count, 1);
    }
}
