use std::fs;
use stepagent::shared::fs_atomic::{atomic_write_file, atomic_write_json, remove_if_exists};

#[test]
fn shared_fs_atomic_replaces_content_and_creates_parents() {
    let temp = tempfile::tempdir().expect("tempdir");
    let target = temp.path().join("nested/status.json");

    atomic_write_file(&target, b"first").expect("write first");
    assert_eq!(fs::read_to_string(&target).expect("read first"), "first");

    atomic_write_json(&target, &serde_json::json!({"state": "running"})).expect("write json");
    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&target).expect("read json")).expect("parse");
    assert_eq!(value["state"], "running");

    let leftovers: Vec<_> = fs::read_dir(target.parent().expect("parent"))
        .expect("read dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name() != "status.json")
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind");
}

#[test]
fn remove_if_exists_reports_whether_anything_was_removed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let target = temp.path().join("flag_file.txt");
    assert!(!remove_if_exists(&target).expect("missing file"));
    fs::write(&target, "x").expect("write");
    assert!(remove_if_exists(&target).expect("existing file"));
    assert!(!target.exists());
}
