//! End-to-end tests for `arbor replay`, `arbor report` and `arbor diff`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn write_trace(dir: &Path, name: &str, foo_exit: u64) -> PathBuf {
    let trace = format!(
        r#"{{
    "definitions": {{
        "regions": [
            {{"name": "main"}},
            {{"name": "parallel", "type": "parallel"}},
            {{"name": "foo"}}
        ]
    }},
    "locations": [
        {{"id": 0}},
        {{"id": 1, "parent": 0}}
    ],
    "events": [
        {{"event": "program_begin", "location": 0, "time": 0}},
        {{"event": "enter", "location": 0, "time": 0, "region": "main"}},
        {{"event": "enter", "location": 0, "time": 10, "region": "parallel"}},
        {{"event": "fork", "location": 0, "threads": 2, "sequence": 1}},
        {{"event": "activate", "location": 1, "parent": 0, "sequence": 1}},
        {{"event": "enter", "location": 1, "time": 11, "region": "foo"}},
        {{"event": "enter", "location": 0, "time": 11, "region": "foo"}},
        {{"event": "exit", "location": 1, "time": {foo_exit}, "region": "foo"}},
        {{"event": "exit", "location": 0, "time": 45, "region": "foo"}},
        {{"event": "deactivate", "location": 1, "parent": 0}},
        {{"event": "join", "location": 0}},
        {{"event": "exit", "location": 0, "time": 50, "region": "parallel"}},
        {{"event": "exit", "location": 0, "time": 60, "region": "main"}},
        {{"event": "program_end", "location": 0, "time": 60}}
    ]
}}"#
    );
    let path = dir.join(name);
    fs::write(&path, trace).unwrap();
    path
}

fn arbor(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_arbor"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run arbor")
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("temporary paths are UTF-8")
}

fn assert_success(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{what} failed:\nstderr: {}\nstdout: {}",
        String::from_utf8_lossy(&output.stderr),
        String::from_utf8_lossy(&output.stdout)
    );
}

#[test]
fn replay_writes_a_profile_with_one_tree_per_thread() {
    let tmp = tempfile::tempdir().unwrap();
    let trace = write_trace(tmp.path(), "trace.json", 40);
    let out = tmp.path().join("out.json");

    let output = arbor(
        &["replay", path_str(&trace), "--output", path_str(&out)],
        tmp.path(),
    );
    assert_success(&output, "arbor replay");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("wrote"), "stderr: {stderr}");

    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    let threads = doc["threads"].as_array().unwrap();
    assert_eq!(threads.len(), 2);

    let program = &threads[0]["roots"][0];
    assert_eq!(program["name"], "PROGRAM");
    assert_eq!(program["inclusive"], 60);
    let main = &program["children"][0];
    assert_eq!(main["name"], "main");

    // The worker's foo hangs below the copied fork path and shares its
    // callpath with the master's foo.
    let worker_program = &threads[1]["roots"][0];
    let worker_foo = &worker_program["children"][0]["children"][0]["children"][0];
    assert_eq!(worker_foo["name"], "foo");
    assert_eq!(worker_foo["inclusive"], 29);
    let master_foo = &main["children"][0]["children"][0];
    assert_eq!(master_foo["callpath"], worker_foo["callpath"]);
}

#[test]
fn default_output_uses_the_configured_base_name() {
    let tmp = tempfile::tempdir().unwrap();
    let trace = write_trace(tmp.path(), "trace.json", 40);

    let output = Command::new(env!("CARGO_BIN_EXE_arbor"))
        .arg("replay")
        .arg(&trace)
        .current_dir(tmp.path())
        .env("ARBOR_PROFILING_BASE_NAME", "nightly")
        .output()
        .expect("failed to run arbor");
    assert_success(&output, "arbor replay");
    assert!(tmp.path().join("nightly.json").is_file());
}

#[test]
fn report_prints_tree_and_flat_views() {
    let tmp = tempfile::tempdir().unwrap();
    let trace = write_trace(tmp.path(), "trace.json", 40);
    let out = tmp.path().join("out.json");
    assert_success(
        &arbor(
            &["replay", path_str(&trace), "-o", path_str(&out)],
            tmp.path(),
        ),
        "arbor replay",
    );

    let tree = arbor(&["report", path_str(&out)], tmp.path());
    assert_success(&tree, "arbor report");
    let stdout = String::from_utf8_lossy(&tree.stdout);
    assert!(stdout.contains("thread 0"), "stdout: {stdout}");
    assert!(stdout.contains("thread 1"), "stdout: {stdout}");
    assert!(stdout.contains("\n      foo "), "foo should be nested: {stdout}");

    let flat = arbor(
        &["report", path_str(&out), "--flat"],
        tmp.path(),
    );
    assert_success(&flat, "arbor report --flat");
    let stdout = String::from_utf8_lossy(&flat.stdout);
    let first = stdout.lines().nth(2).unwrap();
    assert!(
        first.starts_with("PROGRAM/main/parallel/foo "),
        "foo has the most exclusive time: {stdout}"
    );
}

#[test]
fn diff_reports_exclusive_time_changes() {
    let tmp = tempfile::tempdir().unwrap();
    let mut profiles = Vec::new();
    for (name, foo_exit) in [("a", 40), ("b", 20)] {
        let trace = write_trace(tmp.path(), &format!("{name}.trace.json"), foo_exit);
        let out = tmp.path().join(format!("{name}.json"));
        assert_success(
            &arbor(
                &["replay", path_str(&trace), "-o", path_str(&out)],
                tmp.path(),
            ),
            "arbor replay",
        );
        profiles.push(out);
    }

    let output = arbor(
        &["diff", path_str(&profiles[0]), path_str(&profiles[1])],
        tmp.path(),
    );
    assert_success(&output, "arbor diff");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .find(|l| l.starts_with("PROGRAM/main/parallel/foo "))
        .unwrap();
    assert!(line.trim_end().ends_with("-20"), "unexpected line: {line}");
}

#[test]
fn missing_trace_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let output = arbor(&["replay", "nope.json"], tmp.path());
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("error: failed to read"), "stderr: {stderr}");
}
