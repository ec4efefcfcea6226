//! Post-processing: turn the per-location call trees into one finished
//! forest.
//!
//! Runs once, single-threaded, after measurement has quiesced. Every
//! location's tree is copied into one arena first, so later stages can
//! follow fork references between threads without touching the live
//! measurement state. Stages run in a fixed order; each relies on the shape
//! the previous one leaves behind.

mod callpath;
mod collapse;
mod expand;
mod parameters;
mod phases;
mod tasks;

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::OutputFormat;
use crate::definitions::{LocationId, LocationKind, MetricHandle, RegionHandle};
use crate::error::Error;
use crate::node::{CallTree, NodeId};
use crate::node_type::{ForkRef, NodeKind};
use crate::profile::Profile;

/// Identity of one thread root in the forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationInfo {
    pub location: LocationId,
    pub thread: u64,
    pub kind: LocationKind,
    pub root: NodeId,
}

/// The finished profile: one thread root per location, in forest order.
#[derive(Debug, Clone)]
pub struct Forest {
    tree: CallTree,
    locations: Vec<LocationInfo>,
    dense_metrics: Vec<MetricHandle>,
}

impl Forest {
    fn new(tree: CallTree, dense_metrics: Vec<MetricHandle>) -> Self {
        Self {
            tree,
            locations: Vec::new(),
            dense_metrics,
        }
    }

    pub fn tree(&self) -> &CallTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut CallTree {
        &mut self.tree
    }

    /// Thread roots in forest order.
    pub fn locations(&self) -> &[LocationInfo] {
        &self.locations
    }

    /// Metrics behind the dense slots of every node, in slot order.
    pub fn dense_metrics(&self) -> &[MetricHandle] {
        &self.dense_metrics
    }

    pub fn thread_root(&self, location: LocationId) -> Option<NodeId> {
        self.locations
            .iter()
            .find(|l| l.location == location)
            .map(|l| l.root)
    }

    /// First child of `parent` that is a plain visit of `region`.
    pub fn child_region(&self, parent: NodeId, region: RegionHandle) -> Option<NodeId> {
        self.tree.children(parent).find(|&c| {
            matches!(
                self.tree.node(c).kind(),
                NodeKind::RegularRegion { region: r, parameters: None } if *r == region
            )
        })
    }

    /// Follow `path` down from `parent`, one region per level.
    pub fn find_path(&self, parent: NodeId, path: &[RegionHandle]) -> Option<NodeId> {
        path.iter()
            .try_fold(parent, |node, &region| self.child_region(node, region))
    }

    /// Rebuild the location list from the order of the thread roots.
    fn sync_locations(&mut self) {
        let by_root: HashMap<NodeId, LocationInfo> =
            self.locations.iter().map(|l| (l.root, *l)).collect();
        self.locations = self
            .tree
            .roots()
            .filter_map(|r| by_root.get(&r).copied())
            .collect();
    }
}

/// Run the whole pipeline.
pub(crate) fn run(profile: &Profile) -> Result<Forest, Error> {
    force_exit(profile)?;
    let mut forest = consolidate(profile)?;
    let defs = profile.definitions();
    let config = profile.config();

    if profile.has_collapse() {
        collapse::substitute(&mut forest, defs);
    }
    if config.enable_clustering {
        profile.0.clusterer.postprocess(&mut forest, defs, config);
    }
    if config.format != OutputFormat::TauSnapshot {
        parameters::process(&mut forest, defs, profile.instance_parameter());
    }
    expand::expand_threads(&mut forest);
    expand::sort_threads(&mut forest);
    tasks::process(&mut forest, profile)?;
    phases::process(&mut forest, defs);
    callpath::assign(&mut forest, defs)?;

    match config.format {
        OutputFormat::KeyThreads => profile.0.clusterer.key_threads(&mut forest),
        OutputFormat::ClusterThreads => profile.0.clusterer.cluster_same_location(&mut forest),
        _ => {}
    }
    debug!(
        threads = forest.locations.len(),
        nodes = forest.tree.len(),
        "post-processing finished"
    );
    Ok(forest)
}

/// Close the regions still open on the main location, innermost first.
fn force_exit(profile: &Profile) -> Result<(), Error> {
    let Some(main) = profile.main_location() else {
        return Ok(());
    };
    let timestamp = profile.0.clock.now();
    loop {
        let exited = profile.with_location(&main, |data| {
            let mut node = data.current;
            while let Some(n) = node {
                let kind = data.tree.node(n).kind();
                if kind.is_region() || kind.is_collapse() {
                    break;
                }
                node = data.tree.node(n).parent;
            }
            let Some(node) = node else {
                return Ok(false);
            };
            let region = data.tree.node(node).kind().region_handle();
            match region {
                Some(r) => warn!(
                    "Force exit for region {}",
                    profile.definitions().region_name(r)
                ),
                None => warn!("Force exit from collapsed node"),
            }
            // Counters cannot be sampled here. Close with the largest start
            // value still open so no node ends below where it began.
            let mut metrics = vec![0; data.tree.dense_count()];
            let mut open = data.current;
            while let Some(n) = open {
                let node = data.tree.node(n);
                for (slot, m) in metrics.iter_mut().zip(node.dense_metrics()) {
                    *slot = (*slot).max(m.start_value);
                }
                open = node.parent;
            }
            profile.exit_event(data, timestamp, region, &metrics)?;
            Ok(true)
        })?;
        if exited != Some(true) {
            return Ok(());
        }
    }
}

/// Copy every location's tree into one arena, thread roots in forest order,
/// and point thread starts at the copies of their fork anchors.
fn consolidate(profile: &Profile) -> Result<Forest, Error> {
    let dense_metrics = profile.dense_metrics();
    let owner = profile
        .main_location()
        .map_or(LocationId(0), |l| l.id());
    let mut tree = CallTree::new(owner, dense_metrics.len());
    let mut locations = Vec::new();
    let mut maps: HashMap<LocationId, HashMap<NodeId, NodeId>> = HashMap::new();
    let mut moves: HashMap<LocationId, HashMap<NodeId, NodeId>> = HashMap::new();
    let mut last_root: Option<NodeId> = None;

    for location in profile.locations() {
        let data = location.lock();
        let mut map = HashMap::new();
        let root = tree.import_subtree(None, &data.tree, data.root, &mut map)?;
        match last_root {
            None => tree.add_root(root),
            Some(after) => tree.insert_root_after(after, root),
        }
        last_root = Some(root);
        locations.push(LocationInfo {
            location: data.id,
            thread: data.thread,
            kind: data.kind,
            root,
        });
        moves.insert(data.id, data.tree.fork_moves().iter().copied().collect());
        maps.insert(data.id, map);
    }

    let thread_starts: Vec<NodeId> = locations
        .iter()
        .flat_map(|l| tree.children(l.root).collect::<Vec<_>>())
        .filter(|&c| matches!(tree.node(c).kind(), NodeKind::ThreadStart { .. }))
        .collect();
    for start in thread_starts {
        let Some(fork) = tree.node(start).kind().fork() else {
            continue;
        };
        let mut node = fork.node;
        if let Some(redirects) = moves.get(&fork.location) {
            while let Some(&next) = redirects.get(&node) {
                node = next;
            }
        }
        let mapped = maps
            .get(&fork.location)
            .and_then(|m| m.get(&node))
            .map(|&n| ForkRef {
                location: fork.location,
                node: n,
            });
        if mapped.is_none() {
            warn!(location = %fork.location, "thread start refers to an unknown fork point");
        }
        tree.node_mut(start).kind = NodeKind::ThreadStart { fork: mapped };
    }

    for info in &locations {
        merge_duplicate_thread_starts(&mut tree, info.root)?;
    }
    let mut forest = Forest::new(tree, dense_metrics);
    forest.locations = locations;
    Ok(forest)
}

/// Move the children of `source` below `destination`. Children matching an
/// existing child of `destination` are merged into it, the rest are appended
/// in order.
fn merge_children(tree: &mut CallTree, destination: NodeId, source: NodeId) -> Result<(), Error> {
    let children: Vec<NodeId> = tree.children(source).collect();
    for child in children {
        if let Some(matching) = tree.find_child(destination, tree.node(child).kind()) {
            tree.remove_node(child);
            tree.merge_subtree(matching, child)?;
        }
    }
    tree.move_children(Some(destination), source);
    Ok(())
}

/// Redirected fork anchors can make two thread starts of one root equal.
fn merge_duplicate_thread_starts(tree: &mut CallTree, root: NodeId) -> Result<(), Error> {
    let starts: Vec<NodeId> = tree
        .children(root)
        .filter(|&c| matches!(tree.node(c).kind(), NodeKind::ThreadStart { .. }))
        .collect();
    for (i, &dup) in starts.iter().enumerate() {
        let kind = tree.node(dup).kind().clone();
        let first = starts[..i]
            .iter()
            .copied()
            .find(|&s| tree.node(s).kind().same_position(&kind));
        if let Some(first) = first {
            tree.remove_node(dup);
            tree.merge_subtree(first, dup)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::cluster::NoClustering;
    use crate::config::ProfileConfig;
    use crate::definitions::{Definitions, Registry, RegionType};

    #[test]
    fn open_regions_are_closed_at_the_clock_time() {
        let defs = Registry::shared();
        let clock = Arc::new(ManualClock::new(0));
        let profile = Profile::with_collaborators(
            ProfileConfig::default(),
            defs.clone(),
            Arc::new(NoClustering),
            clock.clone(),
        );
        let loc = profile
            .create_location(LocationId(0), 0, LocationKind::Cpu, None)
            .unwrap();
        profile.initialize(vec![]).unwrap();
        let outer = defs.new_region("outer", RegionType::Function);
        let inner = defs.new_region("inner", RegionType::Function);
        profile.program_begin(&loc, 0, &[], &[]).unwrap();
        profile.enter(&loc, 10, outer, &[]).unwrap();
        profile.enter(&loc, 20, inner, &[]).unwrap();
        clock.set(50);

        let forest = profile.process().unwrap();
        assert_eq!(loc.current_depth(), 0);
        let root = forest.thread_root(LocationId(0)).unwrap();
        let program = defs.program_region();
        let inner_node = forest.find_path(root, &[program, outer, inner]).unwrap();
        assert_eq!(forest.tree().node(inner_node).inclusive_time().sum, 30);
        let program_node = forest.find_path(root, &[program]).unwrap();
        assert_eq!(forest.tree().node(program_node).inclusive_time().sum, 50);
    }

    #[test]
    fn consolidation_keeps_forest_order() {
        let defs = Registry::shared();
        let profile = Profile::new(ProfileConfig::default(), defs);
        for (id, parent) in [(0, None), (1, Some(LocationId(0))), (2, Some(LocationId(0)))] {
            profile
                .create_location(LocationId(id), u64::from(id), LocationKind::Cpu, parent)
                .unwrap();
        }
        profile.initialize(vec![]).unwrap();
        let forest = consolidate(&profile).unwrap();
        let order: Vec<LocationId> = forest.locations().iter().map(|l| l.location).collect();
        assert_eq!(order, vec![LocationId(0), LocationId(2), LocationId(1)]);
        let roots: Vec<NodeId> = forest.tree().roots().collect();
        let expected: Vec<NodeId> = forest.locations().iter().map(|l| l.root).collect();
        assert_eq!(roots, expected);
    }
}
