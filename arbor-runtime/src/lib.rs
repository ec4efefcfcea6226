//! Call-path profiling engine.
//!
//! Every location (thread of execution) records enter/exit, parameter,
//! metric and task events into its own call tree. After measurement,
//! `Profile::process` consolidates the trees into one `Forest`: threads are
//! re-attached below the callpath that forked them, parameters and phases are
//! reorganized, and every node gets a unified callpath.

mod clock;
mod cluster;
mod config;
mod debug;
mod definitions;
mod error;
mod event;
mod location;
mod memory;
mod metric;
mod node;
mod node_type;
mod process;
mod profile;
mod tasking;
pub mod writer;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use cluster::{Clusterer, NoClustering};
pub use config::{ClusteringMode, ENV_PREFIX, OutputFormat, ProfileConfig, parse_size};
pub use debug::dump_forest;
pub use definitions::{
    CallpathDef, CallpathHandle, CallpathParameter, Definitions, LocationId, LocationKind,
    MetricHandle, MetricValueType, ParameterHandle, ParameterType, ParameterValue, RegionHandle,
    RegionType, Registry, StringHandle,
};
pub use error::{Error, Severity};
pub use location::Location;
pub use memory::AllocMemento;
pub use metric::{DenseMetric, MetricValue, SparseRecord, TriggerScheme};
pub use node::{CallTree, NO_TIMESTAMP, Node, NodeData, NodeFlags, NodeId};
pub use node_type::{ForkRef, NodeKind, NodeType};
pub use process::{Forest, LocationInfo};
pub use profile::{Lifecycle, Profile};
pub use tasking::TaskHandle;
pub use writer::{JsonWriter, ProfileDocument, ProfileWriter};
