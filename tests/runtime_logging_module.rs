use std::fs;
use stepagent::runtime::{append_runtime_log, bootstrap_state_root, StatePaths};
use tempfile::tempdir;

#[test]
fn runtime_logging_module_writes_json_log_lines() {
    let tmp = tempdir().expect("tempdir");
    let paths = StatePaths::new(tmp.path().join(".stepagent"));
    bootstrap_state_root(&paths).expect("bootstrap state root");

    append_runtime_log(&paths, "info", "dispatch.started", "manager pub-1 starting");
    append_runtime_log(&paths, "warn", "step.closed", "Job100_Step1 closed with failed");

    let log = fs::read_to_string(paths.runtime_log_path()).expect("read runtime log");
    let lines: Vec<serde_json::Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event"], "dispatch.started");
    assert_eq!(lines[1]["level"], "warn");
    assert_eq!(lines[1]["message"], "Job100_Step1 closed with failed");
}
