//! Event entry points: enter/exit, parameters, triggers, fork/join and
//! thread activation.
//!
//! The state of a location is `(current, depth)`. Enter moves one level down
//! (or stays on a collapse node once the depth limit is crossed), exit moves
//! back up to the parent of the closest region or collapse node, closing any
//! parameter nodes in between. A location without a current node (after
//! deactivation) enters and sets parameters below its thread root.

use tracing::warn;

use crate::definitions::{
    LocationId, MetricHandle, MetricValueType, ParameterHandle, RegionHandle, RegionType,
    StringHandle,
};
use crate::error::Error;
use crate::location::{Location, LocationData};
use crate::metric::{Decrease, MetricValue, TriggerScheme};
use crate::node::{CallTree, NO_TIMESTAMP, NodeFlags, NodeId};
use crate::node_type::NodeKind;
use crate::profile::Profile;

fn non_monotonic(location: LocationId, d: Decrease) -> Error {
    Error::NonMonotonicMetric {
        location,
        start: d.start,
        end: d.end,
    }
}

/// First use of a parameter node: inherit the running start values of the
/// parent, since parameters have no matching exit of their own.
fn start_from_parent(tree: &mut CallTree, node: NodeId) {
    let inherited = tree.node(node).parent.map(|p| {
        let parent = tree.node(p);
        let dense: Vec<u64> = parent.dense_metrics.iter().map(|m| m.start_value).collect();
        (parent.inclusive_time.start_value, dense)
    });
    let n = tree.node_mut(node);
    n.count += 1;
    if let Some((start, dense)) = inherited {
        if n.first_enter_time == NO_TIMESTAMP {
            n.first_enter_time = start;
        }
        n.inclusive_time.start(start);
        for (m, v) in n.dense_metrics.iter_mut().zip(dense) {
            m.start(v);
        }
    }
}

impl Profile {
    /// Find or create the node entered from `parent` at `depth` and set its
    /// start values. Collapse nodes swallow every deeper enter.
    pub(crate) fn enter_node(
        &self,
        data: &mut LocationData,
        parent: NodeId,
        depth: u64,
        timestamp: u64,
        region: RegionHandle,
        metrics: &[u64],
    ) -> Result<NodeId, Error> {
        if data.tree.node(parent).kind().is_collapse() {
            self.note_depth(depth);
            return Ok(parent);
        }
        let node = if depth > self.0.config.max_callpath_depth {
            self.set_has_collapse();
            self.note_depth(depth);
            data.tree
                .find_or_create_child(parent, NodeKind::Collapse { depth }, timestamp)?
        } else {
            data.tree
                .find_or_create_child(parent, NodeKind::region(region), timestamp)?
        };
        let n = data.tree.node_mut(node);
        n.count += 1;
        n.inclusive_time.start(timestamp);
        for (i, m) in n.dense_metrics.iter_mut().enumerate() {
            m.start(metrics.get(i).copied().unwrap_or(0));
        }
        Ok(node)
    }

    /// Close `node` and every parameter node above it up to the closest
    /// region or collapse node. Returns the node that becomes current.
    ///
    /// `region` is checked against the closed region node; `None` skips the
    /// check, which is how collapse nodes are left.
    pub(crate) fn exit_node(
        &self,
        data: &mut LocationData,
        node: NodeId,
        region: Option<RegionHandle>,
        timestamp: u64,
        metrics: &[u64],
    ) -> Result<Option<NodeId>, Error> {
        if let NodeKind::Collapse { depth } = *data.tree.node(node).kind() {
            if data.depth > depth {
                data.depth -= 1;
                return Ok(Some(node));
            }
        }

        let location = data.id;
        let mut cur = node;
        let terminal = loop {
            data.depth = data.depth.saturating_sub(1);
            let n = data.tree.node_mut(cur);
            n.last_exit_time = timestamp;
            n.inclusive_time
                .update(timestamp)
                .map_err(|d| non_monotonic(location, d))?;
            for (i, m) in n.dense_metrics.iter_mut().enumerate() {
                m.update(metrics.get(i).copied().unwrap_or(0))
                    .map_err(|d| non_monotonic(location, d))?;
            }
            let closes = n.kind.is_region() || n.kind.is_collapse();
            match n.parent {
                Some(parent) if !closes => cur = parent,
                _ => break cur,
            }
        };

        if let (Some(exited), NodeKind::RegularRegion { region: open, .. }) =
            (region, data.tree.node(terminal).kind())
        {
            if exited != *open {
                return Err(Error::RegionMismatch {
                    location,
                    exited,
                    open: *open,
                });
            }
        }
        Ok(data.tree.node(terminal).parent)
    }

    pub(crate) fn enter_event(
        &self,
        data: &mut LocationData,
        timestamp: u64,
        region: RegionHandle,
        metrics: &[u64],
    ) -> Result<(), Error> {
        let region_type = self.0.defs.region_type(region);
        let parent = data.current.unwrap_or(data.root);
        let depth = data.depth + 1;
        let node = self.enter_node(data, parent, depth, timestamp, region, metrics)?;
        data.depth = depth;
        data.current = Some(node);

        if region_type.is_dynamic() {
            self.0
                .clusterer
                .on_enter_dynamic(data.id, &mut data.tree, node);
            let instance = data.tree.node(node).count;
            self.parameter_event(
                data,
                NodeKind::ParameterInteger {
                    parameter: self.0.reserved.instance,
                    value: instance as i64,
                },
                true,
                true,
            )?;
        }
        Ok(())
    }

    pub(crate) fn exit_event(
        &self,
        data: &mut LocationData,
        timestamp: u64,
        region: Option<RegionHandle>,
        metrics: &[u64],
    ) -> Result<(), Error> {
        let region_type = region.map(|r| self.0.defs.region_type(r));
        if region_type == Some(RegionType::Parallel) {
            self.update_task_metrics(data)?;
        }
        // A location parked on its root or on a thread start has no region open.
        let open = data.current.filter(|&n| {
            !matches!(
                data.tree.node(n).kind(),
                NodeKind::ThreadRoot { .. } | NodeKind::ThreadStart { .. }
            )
        });
        let Some(node) = open else {
            return match region {
                Some(region) => Err(Error::ExitWithoutEnter {
                    location: data.id,
                    region,
                }),
                None => Ok(()),
            };
        };
        let parent = self.exit_node(data, node, region, timestamp, metrics)?;
        if region_type.is_some_and(RegionType::is_dynamic) {
            self.0
                .clusterer
                .finalize_if_necessary(data.id, &mut data.tree, node);
        }
        data.current = parent;
        Ok(())
    }

    /// Push a parameter node. `fresh` always creates a new node instead of
    /// reusing a sibling; only the limit warning of integer parameters is
    /// reported.
    fn parameter_event(
        &self,
        data: &mut LocationData,
        kind: NodeKind,
        fresh: bool,
        warn_on_limit: bool,
    ) -> Result<(), Error> {
        let max = self.0.config.max_callpath_depth;
        // The depth is not raised here: an exit cannot tell how many
        // parameters its region carried.
        if data.depth >= max {
            if warn_on_limit && !data.warned_parameter_depth {
                data.warned_parameter_depth = true;
                warn!(
                    location = %data.id,
                    "parameter dropped: callpath depth limit of {max} exceeded \
                     (reached depth {}). Consider setting \
                     ARBOR_PROFILING_MAX_CALLPATH_DEPTH to {}",
                    self.reached_depth(),
                    self.reached_depth().max(max + 1),
                );
            }
            return Ok(());
        }
        let parent = data.current.unwrap_or(data.root);
        let node = if fresh {
            let untied = data.tree.node(parent).in_untied_task();
            let node = data
                .tree
                .create_node(Some(parent), kind, NO_TIMESTAMP, untied)?;
            data.tree.add_child(parent, node);
            node
        } else {
            data.tree.find_or_create_child(parent, kind, NO_TIMESTAMP)?
        };
        data.depth += 1;
        start_from_parent(&mut data.tree, node);
        data.current = Some(node);
        Ok(())
    }

    fn write_sparse(
        &self,
        data: &mut LocationData,
        node: NodeId,
        samples: &[(MetricHandle, MetricValue)],
        scheme: TriggerScheme,
    ) -> Result<(), Error> {
        for &(metric, value) in samples {
            match self.0.defs.metric_value_type(metric) {
                MetricValueType::Int64 | MetricValueType::Uint64 => {
                    data.tree.trigger_int(node, metric, value.as_u64(), scheme)?
                }
                MetricValueType::Double => {
                    data.tree
                        .trigger_double(node, metric, value.as_f64(), scheme)?
                }
            }
        }
        Ok(())
    }

    /// Enter `region`. `metrics` holds one sample per dense metric passed
    /// to `initialize`; missing samples count as 0.
    pub fn enter(
        &self,
        location: &Location,
        timestamp: u64,
        region: RegionHandle,
        metrics: &[u64],
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            self.enter_event(data, timestamp, region, metrics)
        })
    }

    pub fn exit(
        &self,
        location: &Location,
        timestamp: u64,
        region: RegionHandle,
        metrics: &[u64],
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            self.exit_event(data, timestamp, Some(region), metrics)
        })
    }

    /// Enter with synchronous sparse samples, written as begin values on the
    /// entered node.
    pub fn enter_region(
        &self,
        location: &Location,
        timestamp: u64,
        region: RegionHandle,
        metrics: &[u64],
        sparse: &[(MetricHandle, MetricValue)],
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            self.enter_event(data, timestamp, region, metrics)?;
            let node = data.current.unwrap_or(data.root);
            self.write_sparse(data, node, sparse, TriggerScheme::BeginValue)
        })
    }

    /// Exit with synchronous sparse samples, written as end values on the
    /// node being closed.
    pub fn exit_region(
        &self,
        location: &Location,
        timestamp: u64,
        region: RegionHandle,
        metrics: &[u64],
        sparse: &[(MetricHandle, MetricValue)],
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            if !sparse.is_empty() {
                let node = data.current.ok_or(Error::NoCurrentNode {
                    location: data.id,
                    metric: sparse[0].0,
                })?;
                self.write_sparse(data, node, sparse, TriggerScheme::EndValue)?;
            }
            self.exit_event(data, timestamp, Some(region), metrics)
        })
    }

    pub fn program_begin(
        &self,
        location: &Location,
        timestamp: u64,
        metrics: &[u64],
        sparse: &[(MetricHandle, MetricValue)],
    ) -> Result<(), Error> {
        self.0
            .program_begin
            .store(timestamp, std::sync::atomic::Ordering::Relaxed);
        let program = self.0.defs.program_region();
        self.enter_region(location, timestamp, program, metrics, sparse)
    }

    pub fn program_end(
        &self,
        location: &Location,
        timestamp: u64,
        metrics: &[u64],
        sparse: &[(MetricHandle, MetricValue)],
    ) -> Result<(), Error> {
        let program = self.0.defs.program_region();
        self.exit_region(location, timestamp, program, metrics, sparse)?;
        let id = location.id();
        if !self.dense_metrics().is_empty() && !self.is_main(id) {
            warn!(
                location = %id,
                "program ended on a location other than the initial one; per-thread \
                 metric values for the program region ({}) might be invalid",
                self.0.defs.region_name(program)
            );
        }
        Ok(())
    }

    /// Stop recording: the region stands for the unrecorded interval.
    pub fn disable_recording(
        &self,
        location: &Location,
        timestamp: u64,
        region: RegionHandle,
        metrics: &[u64],
    ) -> Result<(), Error> {
        self.enter(location, timestamp, region, metrics)
    }

    pub fn enable_recording(
        &self,
        location: &Location,
        timestamp: u64,
        region: RegionHandle,
        metrics: &[u64],
    ) -> Result<(), Error> {
        self.exit(location, timestamp, region, metrics)
    }

    /// Count one sample hit on the current node.
    pub fn sample(&self, location: &Location) -> Result<(), Error> {
        self.on_location(location, |data| {
            if let Some(node) = data.current {
                data.tree.node_mut(node).hits += 1;
            }
            Ok(())
        })
    }

    pub fn trigger_int(
        &self,
        location: &Location,
        metric: MetricHandle,
        value: u64,
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            let node = data.current.ok_or(Error::NoCurrentNode {
                location: data.id,
                metric,
            })?;
            data.tree
                .trigger_int(node, metric, value, TriggerScheme::AsIs)
        })
    }

    pub fn trigger_double(
        &self,
        location: &Location,
        metric: MetricHandle,
        value: f64,
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            let node = data.current.ok_or(Error::NoCurrentNode {
                location: data.id,
                metric,
            })?;
            data.tree
                .trigger_double(node, metric, value, TriggerScheme::AsIs)
        })
    }

    pub fn parameter_int(
        &self,
        location: &Location,
        parameter: ParameterHandle,
        value: i64,
    ) -> Result<(), Error> {
        let fresh = parameter == self.0.reserved.instance;
        self.on_location(location, |data| {
            self.parameter_event(
                data,
                NodeKind::ParameterInteger { parameter, value },
                fresh,
                true,
            )
        })
    }

    /// Unsigned values share the integer node kind, reinterpreted as i64.
    pub fn parameter_uint(
        &self,
        location: &Location,
        parameter: ParameterHandle,
        value: u64,
    ) -> Result<(), Error> {
        self.parameter_int(location, parameter, value as i64)
    }

    pub fn parameter_string(
        &self,
        location: &Location,
        parameter: ParameterHandle,
        value: StringHandle,
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            self.parameter_event(
                data,
                NodeKind::ParameterString { parameter, value },
                false,
                false,
            )
        })
    }

    /// Record a fork point for the threads of the parallel region numbered
    /// `sequence`. A thread that is still on its thread start forwards the
    /// fork point it was itself started from.
    pub fn fork(
        &self,
        location: &Location,
        _requested_threads: u32,
        sequence: u32,
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            let current = data.current.unwrap_or(data.root);
            let inherited = data.tree.node(current).kind().fork();
            let anchor = match inherited {
                Some(fork) => fork,
                None => {
                    data.tree
                        .node_mut(current)
                        .flags
                        .insert(NodeFlags::IS_FORK_NODE);
                    data.local_ref(current)
                }
            };
            let depth = data.depth;
            data.add_fork_point(anchor, depth, sequence);
            Ok(())
        })
    }

    pub fn join(&self, location: &Location) -> Result<(), Error> {
        self.on_location(location, |data| {
            data.remove_fork_point();
            Ok(())
        })
    }

    /// Make `location` run on behalf of the parallel region `sequence` forked
    /// by `parent`. Reactivation for the same fork point reuses its thread
    /// start node.
    pub fn activate(
        &self,
        location: &Location,
        parent: Option<LocationId>,
        sequence: u32,
    ) -> Result<(), Error> {
        self.assure_active()?;
        let creation = match parent {
            Some(id) => {
                let parent = self.location(id)?;
                let p = parent.lock();
                Some((p.fork_node(sequence), p.fork_depth(sequence)))
            }
            None => None,
        };
        self.on_location(location, |data| {
            let fork = creation.and_then(|(fork, _)| fork);
            if let Some((_, depth)) = creation {
                data.depth = depth;
            }
            let root = data.root;
            let existing = data.tree.children(root).find(|&c| {
                matches!(data.tree.node(c).kind(), NodeKind::ThreadStart { fork: f } if *f == fork)
            });
            let start = match existing {
                Some(start) => start,
                None => {
                    let start = data.tree.create_node(
                        Some(root),
                        NodeKind::ThreadStart { fork },
                        0,
                        false,
                    )?;
                    data.tree.add_child(root, start);
                    start
                }
            };
            data.current = Some(start);
            Ok(())
        })
    }

    pub fn deactivate(
        &self,
        location: &Location,
        _parent: Option<LocationId>,
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            data.current = None;
            Ok(())
        })
    }
}
