//! Node identity: the closed set of node kinds and their per-kind
//! equality, hashing and ordering.
//!
//! Two sibling nodes stand for the same callpath position exactly when
//! `NodeKind::same_position` holds. Which payload fields take part depends on
//! the kind: thread roots compare by thread id only, thread starts by their
//! fork anchor, parameters by `(parameter, value)`.

use std::fmt;
use std::sync::Arc;

use crate::definitions::{
    CallpathParameter, Definitions, LocationId, ParameterHandle, ParameterValue, RegionHandle,
    StringHandle,
};
use crate::node::NodeId;

/// Where a thread was forked from: a node in another location's tree.
///
/// The reference never owns the node. It stays valid because fork-flagged
/// nodes are never recycled while measurement runs; after consolidation
/// `node` indexes the consolidated forest instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForkRef {
    pub location: LocationId,
    pub node: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeType {
    RegularRegion,
    ParameterString,
    ParameterInteger,
    ThreadRoot,
    ThreadStart,
    Collapse,
    TaskRoot,
}

impl NodeType {
    pub fn name(self) -> &'static str {
        match self {
            NodeType::RegularRegion => "regular region",
            NodeType::ParameterString => "parameter string",
            NodeType::ParameterInteger => "parameter integer",
            NodeType::ThreadRoot => "thread root",
            NodeType::ThreadStart => "thread start",
            NodeType::Collapse => "collapse",
            NodeType::TaskRoot => "task root",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A region visit. `parameters` is only set by parameter reorganization
    /// after measurement.
    RegularRegion {
        region: RegionHandle,
        parameters: Option<Arc<[CallpathParameter]>>,
    },
    ParameterString {
        parameter: ParameterHandle,
        value: StringHandle,
    },
    ParameterInteger {
        parameter: ParameterHandle,
        value: i64,
    },
    ThreadRoot {
        location: LocationId,
        thread: u64,
    },
    /// Activation of a thread. `None` when the thread was activated without a
    /// known fork point.
    ThreadStart { fork: Option<ForkRef> },
    Collapse { depth: u64 },
    TaskRoot { region: RegionHandle },
}

impl NodeKind {
    pub fn region(region: RegionHandle) -> Self {
        NodeKind::RegularRegion {
            region,
            parameters: None,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::RegularRegion { .. } => NodeType::RegularRegion,
            NodeKind::ParameterString { .. } => NodeType::ParameterString,
            NodeKind::ParameterInteger { .. } => NodeType::ParameterInteger,
            NodeKind::ThreadRoot { .. } => NodeType::ThreadRoot,
            NodeKind::ThreadStart { .. } => NodeType::ThreadStart,
            NodeKind::Collapse { .. } => NodeType::Collapse,
            NodeKind::TaskRoot { .. } => NodeType::TaskRoot,
        }
    }

    /// Region of region-like nodes (regular regions and task roots).
    pub fn region_handle(&self) -> Option<RegionHandle> {
        match self {
            NodeKind::RegularRegion { region, .. } | NodeKind::TaskRoot { region } => {
                Some(*region)
            }
            _ => None,
        }
    }

    pub fn fork(&self) -> Option<ForkRef> {
        match self {
            NodeKind::ThreadStart { fork } => *fork,
            _ => None,
        }
    }

    pub fn is_region(&self) -> bool {
        matches!(self, NodeKind::RegularRegion { .. })
    }

    pub fn is_collapse(&self) -> bool {
        matches!(self, NodeKind::Collapse { .. })
    }

    pub fn is_parameter(&self) -> bool {
        matches!(
            self,
            NodeKind::ParameterString { .. } | NodeKind::ParameterInteger { .. }
        )
    }

    /// Human-readable name, as shown in dumps and written profiles.
    pub fn label(&self, defs: &dyn Definitions) -> String {
        match self {
            NodeKind::RegularRegion { region, parameters } => {
                let name = defs.region_name(*region);
                match parameters {
                    Some(params) if !params.is_empty() => {
                        let list: Vec<String> = params
                            .iter()
                            .map(|p| {
                                let value = match p.value {
                                    ParameterValue::Int(v) => v.to_string(),
                                    ParameterValue::String(s) => defs.string(s),
                                };
                                format!("{}={value}", defs.parameter_name(p.parameter))
                            })
                            .collect();
                        format!("{name} [{}]", list.join(", "))
                    }
                    _ => name,
                }
            }
            NodeKind::ParameterString { parameter, value } => {
                format!("{}={}", defs.parameter_name(*parameter), defs.string(*value))
            }
            NodeKind::ParameterInteger { parameter, value } => {
                format!("{}={value}", defs.parameter_name(*parameter))
            }
            NodeKind::ThreadRoot { thread, .. } => format!("thread {thread}"),
            NodeKind::ThreadStart { fork: Some(f) } => {
                format!("thread start (forked on {} at node {})", f.location, f.node.index())
            }
            NodeKind::ThreadStart { fork: None } => "thread start".to_owned(),
            NodeKind::Collapse { .. } => "COLLAPSE".to_owned(),
            NodeKind::TaskRoot { region } => defs.region_name(*region),
        }
    }

    /// Whether `self` and `other` denote the same callpath position.
    pub fn same_position(&self, other: &NodeKind) -> bool {
        match (self, other) {
            (
                NodeKind::RegularRegion {
                    region: a,
                    parameters: pa,
                },
                NodeKind::RegularRegion {
                    region: b,
                    parameters: pb,
                },
            ) => a == b && pa == pb,
            (
                NodeKind::ParameterString {
                    parameter: a,
                    value: va,
                },
                NodeKind::ParameterString {
                    parameter: b,
                    value: vb,
                },
            ) => a == b && va == vb,
            (
                NodeKind::ParameterInteger {
                    parameter: a,
                    value: va,
                },
                NodeKind::ParameterInteger {
                    parameter: b,
                    value: vb,
                },
            ) => a == b && va == vb,
            (NodeKind::ThreadRoot { thread: a, .. }, NodeKind::ThreadRoot { thread: b, .. }) => {
                a == b
            }
            (NodeKind::ThreadStart { fork: a }, NodeKind::ThreadStart { fork: b }) => a == b,
            (NodeKind::Collapse { depth: a }, NodeKind::Collapse { depth: b }) => a == b,
            (NodeKind::TaskRoot { region: a }, NodeKind::TaskRoot { region: b }) => a == b,
            _ => false,
        }
    }

    /// Hash consistent with `same_position`, mixed with the node type.
    pub fn position_hash(&self) -> u64 {
        let data = match self {
            NodeKind::RegularRegion { region, .. } | NodeKind::TaskRoot { region } => {
                u64::from(region.0)
            }
            NodeKind::ParameterString { parameter, value } => {
                u64::from(parameter.0) ^ u64::from(value.0).rotate_left(32)
            }
            NodeKind::ParameterInteger { parameter, value } => {
                u64::from(parameter.0) ^ (*value as u64).rotate_left(32)
            }
            NodeKind::ThreadRoot { thread, .. } => *thread,
            NodeKind::ThreadStart { fork } => fork.map_or(0, |f| {
                u64::from(f.node.index() as u32) ^ u64::from(f.location.0).rotate_left(32)
            }),
            NodeKind::Collapse { depth } => *depth,
        };
        (self.node_type() as u64).rotate_left(56) ^ data
    }

    /// Strict order: by node type first, then by the payload fields that
    /// take part in `same_position`.
    pub fn less_than(&self, other: &NodeKind) -> bool {
        let (ta, tb) = (self.node_type(), other.node_type());
        if ta != tb {
            return ta < tb;
        }
        match (self, other) {
            (
                NodeKind::RegularRegion { region: a, .. },
                NodeKind::RegularRegion { region: b, .. },
            )
            | (NodeKind::TaskRoot { region: a }, NodeKind::TaskRoot { region: b }) => a < b,
            (
                NodeKind::ParameterString {
                    parameter: a,
                    value: va,
                },
                NodeKind::ParameterString {
                    parameter: b,
                    value: vb,
                },
            ) => (a, va) < (b, vb),
            (
                NodeKind::ParameterInteger {
                    parameter: a,
                    value: va,
                },
                NodeKind::ParameterInteger {
                    parameter: b,
                    value: vb,
                },
            ) => (a, va) < (b, vb),
            (NodeKind::ThreadRoot { thread: a, .. }, NodeKind::ThreadRoot { thread: b, .. }) => {
                a < b
            }
            (NodeKind::ThreadStart { fork: a }, NodeKind::ThreadStart { fork: b }) => {
                let key = |f: &Option<ForkRef>| f.map(|f| (f.location, f.node.index()));
                key(a) < key(b)
            }
            (NodeKind::Collapse { depth: a }, NodeKind::Collapse { depth: b }) => a < b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_roots_compare_by_thread_only() {
        let a = NodeKind::ThreadRoot {
            location: LocationId(1),
            thread: 4,
        };
        let b = NodeKind::ThreadRoot {
            location: LocationId(9),
            thread: 4,
        };
        assert!(a.same_position(&b));
        assert_eq!(a.position_hash(), b.position_hash());
    }

    #[test]
    fn parameters_compare_by_handle_and_value() {
        let p = ParameterHandle(2);
        let a = NodeKind::ParameterInteger {
            parameter: p,
            value: 10,
        };
        let b = NodeKind::ParameterInteger {
            parameter: p,
            value: 11,
        };
        assert!(!a.same_position(&b));
        assert!(a.less_than(&b));
        assert!(!b.less_than(&a));
    }

    #[test]
    fn region_parameter_list_distinguishes_siblings() {
        let plain = NodeKind::region(RegionHandle(3));
        let with_params = NodeKind::RegularRegion {
            region: RegionHandle(3),
            parameters: Some(Arc::from(vec![CallpathParameter {
                parameter: ParameterHandle(0),
                value: ParameterValue::Int(1),
            }])),
        };
        assert!(!plain.same_position(&with_params));
        assert!(plain.same_position(&NodeKind::region(RegionHandle(3))));
    }

    #[test]
    fn different_kinds_never_match_and_order_by_type() {
        let region = NodeKind::region(RegionHandle(0));
        let collapse = NodeKind::Collapse { depth: 0 };
        assert!(!region.same_position(&collapse));
        assert!(region.less_than(&collapse));
        assert_ne!(region.position_hash(), collapse.position_hash());
    }
}
