use std::collections::HashMap;
use std::path::Path;

use arbor_runtime::ProfileDocument;
use arbor_runtime::writer::{CallNode, ThreadProfile};

use crate::error::Error;

const NAME_WIDTH: usize = 48;

/// Read a profile written by `arbor replay` from a JSON file on disk.
pub fn load_profile(path: &Path) -> Result<ProfileDocument, Error> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|e| Error::InvalidProfile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn select_threads(doc: &ProfileDocument, thread: Option<u64>) -> Result<Vec<&ThreadProfile>, Error> {
    match thread {
        None => Ok(doc.threads.iter().collect()),
        Some(t) => {
            let selected: Vec<&ThreadProfile> =
                doc.threads.iter().filter(|p| p.thread == t).collect();
            if selected.is_empty() {
                return Err(Error::NoSuchThread(t));
            }
            Ok(selected)
        }
    }
}

/// Render the call tree of every (or one) thread, children indented below
/// their parents.
pub fn format_tree(doc: &ProfileDocument, thread: Option<u64>) -> Result<String, Error> {
    let mut out = String::new();
    for profile in select_threads(doc, thread)? {
        out.push_str(&format!(
            "thread {} (location {}, {:?})\n",
            profile.thread, profile.location, profile.kind
        ));
        out.push_str(&format!(
            "{:<NAME_WIDTH$} {:>8} {:>12} {:>12}\n",
            "Callpath", "Visits", "Inclusive", "Exclusive"
        ));
        out.push_str(&format!("{}\n", "-".repeat(NAME_WIDTH + 35)));
        for root in &profile.roots {
            tree_lines(&mut out, root, 0);
        }
        out.push('\n');
    }
    Ok(out)
}

fn tree_lines(out: &mut String, node: &CallNode, depth: usize) {
    let label = format!("{}{}", "  ".repeat(depth), node.name);
    out.push_str(&format!(
        "{:<NAME_WIDTH$} {:>8} {:>12} {:>12}\n",
        label, node.visits, node.inclusive, node.exclusive
    ));
    for child in &node.children {
        tree_lines(out, child, depth + 1);
    }
}

/// Totals of one callpath, summed over threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    /// Region names from the thread root down, joined by `/`.
    pub path: String,
    pub visits: u64,
    pub inclusive: u64,
    pub exclusive: u64,
}

/// Flatten the selected threads into one entry per callpath, sorted by
/// exclusive time descending.
pub fn flat_profile(doc: &ProfileDocument, thread: Option<u64>) -> Result<Vec<FlatEntry>, Error> {
    let mut totals: HashMap<String, FlatEntry> = HashMap::new();
    for profile in select_threads(doc, thread)? {
        for root in &profile.roots {
            collect_flat(&mut totals, root, "");
        }
    }
    let mut entries: Vec<FlatEntry> = totals.into_values().collect();
    entries.sort_by(|a, b| b.exclusive.cmp(&a.exclusive).then_with(|| a.path.cmp(&b.path)));
    Ok(entries)
}

fn collect_flat(totals: &mut HashMap<String, FlatEntry>, node: &CallNode, prefix: &str) {
    let path = if prefix.is_empty() {
        node.name.clone()
    } else {
        format!("{prefix}/{}", node.name)
    };
    let entry = totals.entry(path.clone()).or_insert_with(|| FlatEntry {
        path: path.clone(),
        visits: 0,
        inclusive: 0,
        exclusive: 0,
    });
    entry.visits += node.visits;
    entry.inclusive += node.inclusive;
    entry.exclusive += node.exclusive;
    for child in &node.children {
        collect_flat(totals, child, &path);
    }
}

/// Format flat entries as a text table.
pub fn format_flat(entries: &[FlatEntry]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<NAME_WIDTH$} {:>8} {:>12} {:>12}\n",
        "Callpath", "Visits", "Inclusive", "Exclusive"
    ));
    out.push_str(&format!("{}\n", "-".repeat(NAME_WIDTH + 35)));
    for entry in entries {
        out.push_str(&format!(
            "{:<NAME_WIDTH$} {:>8} {:>12} {:>12}\n",
            entry.path, entry.visits, entry.inclusive, entry.exclusive
        ));
    }
    out
}

/// Show the change in exclusive time between two profiles, by callpath.
pub fn diff_profiles(a: &ProfileDocument, b: &ProfileDocument) -> Result<String, Error> {
    let a_flat = flat_profile(a, None)?;
    let b_flat = flat_profile(b, None)?;
    let a_map: HashMap<&str, u64> = a_flat.iter().map(|e| (e.path.as_str(), e.exclusive)).collect();
    let b_map: HashMap<&str, u64> = b_flat.iter().map(|e| (e.path.as_str(), e.exclusive)).collect();

    let mut names: Vec<&str> = a_map.keys().chain(b_map.keys()).copied().collect();
    names.sort_unstable();
    names.dedup();

    let mut out = String::new();
    out.push_str(&format!(
        "{:<NAME_WIDTH$} {:>12} {:>12} {:>12}\n",
        "Callpath", "Before", "After", "Delta"
    ));
    out.push_str(&format!("{}\n", "-".repeat(NAME_WIDTH + 39)));
    for name in &names {
        let before = a_map.get(name).copied().unwrap_or(0);
        let after = b_map.get(name).copied().unwrap_or(0);
        let delta = i128::from(after) - i128::from(before);
        out.push_str(&format!(
            "{:<NAME_WIDTH$} {:>12} {:>12} {:>+12}\n",
            name, before, after, delta
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use arbor_runtime::{LocationId, LocationKind};
    use tempfile::TempDir;

    fn node(name: &str, visits: u64, inclusive: u64, children: Vec<CallNode>) -> CallNode {
        let exclusive = children
            .iter()
            .fold(inclusive, |acc, c| acc.saturating_sub(c.inclusive));
        CallNode {
            callpath: None,
            name: name.to_owned(),
            kind: "regular region".to_owned(),
            visits,
            hits: 0,
            inclusive,
            exclusive,
            dense: Vec::new(),
            sparse: Vec::new(),
            children,
        }
    }

    fn thread(thread: u64, roots: Vec<CallNode>) -> ThreadProfile {
        ThreadProfile {
            location: LocationId(thread as u32),
            thread,
            kind: LocationKind::Cpu,
            roots,
        }
    }

    fn sample() -> ProfileDocument {
        ProfileDocument {
            format: "default".to_owned(),
            metrics: Vec::new(),
            threads: vec![
                thread(
                    0,
                    vec![node(
                        "PROGRAM",
                        1,
                        100,
                        vec![node("main", 1, 90, vec![node("parse", 10, 60, vec![])])],
                    )],
                ),
                thread(
                    1,
                    vec![node(
                        "PROGRAM",
                        0,
                        40,
                        vec![node("main", 0, 40, vec![node("parse", 4, 40, vec![])])],
                    )],
                ),
            ],
        }
    }

    #[test]
    fn load_profile_from_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.json");
        fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();

        let doc = load_profile(&path).unwrap();
        assert_eq!(doc, sample());
    }

    #[test]
    fn load_profile_reports_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.json");
        fs::write(&path, "{\"threads\": 3}").unwrap();
        let err = load_profile(&path).unwrap_err();
        assert!(
            err.to_string().contains("invalid profile"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn flat_profile_sums_threads_by_callpath() {
        let entries = flat_profile(&sample(), None).unwrap();
        assert_eq!(entries[0].path, "PROGRAM/main/parse");
        assert_eq!(entries[0].visits, 14);
        assert_eq!(entries[0].exclusive, 100);
        let main = entries
            .iter()
            .find(|e| e.path == "PROGRAM/main")
            .unwrap();
        assert_eq!((main.inclusive, main.exclusive), (130, 30));
    }

    #[test]
    fn flat_profile_of_one_thread() {
        let entries = flat_profile(&sample(), Some(1)).unwrap();
        let parse = entries
            .iter()
            .find(|e| e.path == "PROGRAM/main/parse")
            .unwrap();
        assert_eq!(parse.visits, 4);
        assert!(matches!(
            flat_profile(&sample(), Some(7)),
            Err(Error::NoSuchThread(7))
        ));
    }

    #[test]
    fn tree_indents_children() {
        let text = format_tree(&sample(), Some(0)).unwrap();
        assert!(text.starts_with("thread 0 (location 0, Cpu)"));
        assert!(text.contains("\n  main "), "main should be indented:\n{text}");
        assert!(text.contains("\n    parse "), "parse should be indented twice:\n{text}");
        assert!(!text.contains("thread 1"));
    }

    #[test]
    fn diff_shows_delta() {
        let before = sample();
        let mut after = sample();
        after.threads.truncate(1);
        let diff = diff_profiles(&before, &after).unwrap();
        let line = diff
            .lines()
            .find(|l| l.starts_with("PROGRAM/main/parse "))
            .unwrap();
        assert!(line.trim_end().ends_with("-40"), "unexpected line: {line}");
    }
}
