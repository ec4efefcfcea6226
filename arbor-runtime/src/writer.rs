//! Profile output.
//!
//! A `ProfileWriter` receives the processed forest together with the
//! definitions needed to name things. `JsonWriter` serializes it as a
//! `ProfileDocument`, which is also what `arbor report` reads back.

use std::io::Write;

use crate::config::OutputFormat;
use crate::definitions::{Definitions, LocationId, LocationKind};
use crate::error::Error;
use crate::metric::MetricValue;
use crate::node::{CallTree, NodeId};
use crate::process::Forest;

pub trait ProfileWriter {
    fn write(&mut self, forest: &Forest, defs: &dyn Definitions) -> Result<(), Error>;
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProfileDocument {
    pub format: String,
    /// Names of the dense metrics, in the order of `CallNode::dense`.
    pub metrics: Vec<String>,
    pub threads: Vec<ThreadProfile>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThreadProfile {
    pub location: LocationId,
    pub thread: u64,
    pub kind: LocationKind,
    pub roots: Vec<CallNode>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callpath: Option<u32>,
    pub name: String,
    pub kind: String,
    pub visits: u64,
    #[serde(default)]
    pub hits: u64,
    pub inclusive: u64,
    pub exclusive: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dense: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sparse: Vec<SparseSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CallNode>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SparseSummary {
    pub metric: String,
    pub count: u64,
    pub sum: MetricValue,
    pub min: MetricValue,
    pub max: MetricValue,
}

impl ProfileDocument {
    pub fn from_forest(forest: &Forest, defs: &dyn Definitions, format: OutputFormat) -> Self {
        let tree = forest.tree();
        let threads = forest
            .locations()
            .iter()
            .map(|info| ThreadProfile {
                location: info.location,
                thread: info.thread,
                kind: info.kind,
                roots: tree
                    .children(info.root)
                    .map(|c| call_node(tree, defs, c))
                    .collect(),
            })
            .collect();
        Self {
            format: format.name().to_owned(),
            metrics: forest
                .dense_metrics()
                .iter()
                .map(|&m| defs.metric_name(m))
                .collect(),
            threads,
        }
    }
}

fn call_node(tree: &CallTree, defs: &dyn Definitions, node: NodeId) -> CallNode {
    let n = tree.node(node);
    let children: Vec<CallNode> = tree
        .children(node)
        .map(|c| call_node(tree, defs, c))
        .collect();
    let inclusive = n.inclusive_time().sum;
    let exclusive = children
        .iter()
        .fold(inclusive, |acc, c| acc.saturating_sub(c.inclusive));
    let sparse = tree
        .int_metrics(node)
        .map(|r| SparseSummary {
            metric: defs.metric_name(r.metric),
            count: r.count,
            sum: MetricValue::Int(r.sum),
            min: MetricValue::Int(r.min),
            max: MetricValue::Int(r.max),
        })
        .chain(tree.double_metrics(node).map(|r| SparseSummary {
            metric: defs.metric_name(r.metric),
            count: r.count,
            sum: MetricValue::Double(r.sum),
            min: MetricValue::Double(r.min),
            max: MetricValue::Double(r.max),
        }))
        .collect();
    CallNode {
        callpath: n.callpath().map(|c| c.0),
        name: n.kind().label(defs),
        kind: n.kind().node_type().name().to_owned(),
        visits: n.count(),
        hits: n.hits(),
        inclusive,
        exclusive,
        dense: n.dense_metrics().iter().map(|m| m.sum).collect(),
        sparse,
        children,
    }
}

/// Writes the forest as one JSON document.
#[derive(Debug)]
pub struct JsonWriter<W> {
    out: W,
    format: OutputFormat,
    pretty: bool,
}

impl<W: Write> JsonWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            pretty: false,
        }
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProfileWriter for JsonWriter<W> {
    fn write(&mut self, forest: &Forest, defs: &dyn Definitions) -> Result<(), Error> {
        let doc = ProfileDocument::from_forest(forest, defs, self.format);
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.out, &doc)?;
        } else {
            serde_json::to_writer(&mut self.out, &doc)?;
        }
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}
