//! Text dumps of call trees and core files for stopped locations.

use std::fmt::Write as _;
use std::path::PathBuf;

use crate::definitions::Definitions;
use crate::error::Error;
use crate::location::LocationData;
use crate::node::{CallTree, NO_TIMESTAMP, NodeId};
use crate::process::Forest;
use crate::profile::Profile;

fn dump_node(out: &mut String, defs: &dyn Definitions, tree: &CallTree, node: NodeId, indent: usize) {
    let n = tree.node(node);
    let _ = write!(
        out,
        "{:indent$}{} count={} incl={} excl={}",
        "",
        n.kind().label(defs),
        n.count(),
        n.inclusive_time().sum,
        tree.exclusive_time(node),
        indent = indent * 2
    );
    if n.first_enter_time() != NO_TIMESTAMP {
        let _ = write!(out, " first_enter={}", n.first_enter_time());
    }
    if let Some(cp) = n.callpath() {
        let _ = write!(out, " callpath={cp}");
    }
    if n.is_fork_node() {
        out.push_str(" fork");
    }
    for record in tree.int_metrics(node) {
        let _ = write!(
            out,
            " {}={}/{}",
            defs.metric_name(record.metric),
            record.sum,
            record.count
        );
    }
    for record in tree.double_metrics(node) {
        let _ = write!(
            out,
            " {}={}/{}",
            defs.metric_name(record.metric),
            record.sum,
            record.count
        );
    }
    out.push('\n');
    for child in tree.children(node) {
        dump_node(out, defs, tree, child, indent + 1);
    }
}

/// Render one location's tree, root first, one node per line.
pub fn dump_location(defs: &dyn Definitions, data: &LocationData) -> String {
    let mut out = format!("location {} (thread {}", data.id, data.thread);
    if let Some(parent) = data.parent {
        let _ = write!(out, ", parent {parent}");
    }
    let _ = writeln!(
        out,
        ", depth {}{})",
        data.depth,
        if data.stopped { ", stopped" } else { "" }
    );
    dump_node(&mut out, defs, &data.tree, data.root, 1);
    out
}

/// Render every thread root of a processed forest.
pub fn dump_forest(defs: &dyn Definitions, forest: &Forest) -> String {
    let mut out = String::new();
    for info in forest.locations() {
        let _ = writeln!(out, "location {} ({:?})", info.location, info.kind);
        dump_node(&mut out, defs, forest.tree(), info.root, 1);
    }
    out
}

/// Write `<core_dir>/<base_name>.<location>.core` for a location that was
/// just stopped by `err`: the error, the open stack and the whole tree.
pub(crate) fn write_core_file(
    profile: &Profile,
    data: &LocationData,
    err: &Error,
) -> std::io::Result<PathBuf> {
    let config = profile.config();
    let defs = profile.definitions();
    std::fs::create_dir_all(&config.core_dir)?;
    let path = config
        .core_dir
        .join(format!("{}.{}.core", config.base_name, data.id));

    let mut out = format!("error: {err}\n\nstack:\n");
    let mut cur = data.current;
    while let Some(node) = cur {
        let n = data.tree.node(node);
        let _ = writeln!(out, "  {}", n.kind().label(defs));
        cur = n.parent();
    }
    out.push_str("\ntree:\n");
    out.push_str(&dump_location(defs, data));
    std::fs::write(&path, out)?;
    Ok(path)
}
