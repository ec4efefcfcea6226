//! Hook points for iteration clustering.
//!
//! The engine forwards control to a `Clusterer` when a dynamic region is
//! entered or left and at three post-processing stages. It never looks at
//! what the clusterer did. Every method defaults to doing nothing, which is
//! what `NoClustering` relies on.

use crate::config::ProfileConfig;
use crate::definitions::{Definitions, LocationId};
use crate::node::{CallTree, NodeId};
use crate::process::Forest;

pub trait Clusterer: Send + Sync {
    /// A dynamic region was entered; `node` is its region node.
    fn on_enter_dynamic(&self, _location: LocationId, _tree: &mut CallTree, _node: NodeId) {}

    /// A dynamic region was left; `node` is the region node being closed.
    fn finalize_if_necessary(&self, _location: LocationId, _tree: &mut CallTree, _node: NodeId) {}

    /// Cluster reenumeration, right after collapse substitution.
    fn postprocess(&self, _forest: &mut Forest, _defs: &dyn Definitions, _config: &ProfileConfig) {
    }

    /// Reduce the forest to representative threads.
    fn key_threads(&self, _forest: &mut Forest) {}

    /// Merge threads with identical structure.
    fn cluster_same_location(&self, _forest: &mut Forest) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoClustering;

impl Clusterer for NoClustering {}
