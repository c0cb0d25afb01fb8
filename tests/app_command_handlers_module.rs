use clap::Parser;
use std::fs;
use std::path::Path;
use std::time::Duration;
use stepagent::app::cli::Cli;
use stepagent::app::command_handlers::run_cli;
use stepagent::queue::SqliteTaskQueue;
use tempfile::tempdir;

const MANIFEST: &str = "\
stagers:
  - tool: Sync
    class: StagerNoResources
executors:
  - tool: Sync
    class: ExecutorDeconTools
";

fn write_settings(root: &Path) {
    fs::create_dir_all(root).expect("state root");
    let work = root.join("work");
    fs::write(
        root.join("config.yaml"),
        format!(
            "manager:\n  name: pub-1\n  working_dir: {}\n",
            work.display()
        ),
    )
    .expect("settings");
    fs::write(root.join("plugins.yaml"), MANIFEST).expect("manifest");
}

fn cli(root: &Path, args: &[&str]) -> Cli {
    let mut argv = vec![
        "stepagent".to_string(),
        "--state-root".to_string(),
        root.display().to_string(),
    ];
    argv.extend(args.iter().map(|arg| arg.to_string()));
    Cli::try_parse_from(argv).expect("parse cli")
}

#[test]
fn unknown_subcommand_is_rejected_by_the_parser() {
    assert!(Cli::try_parse_from(["stepagent", "unknown-command"]).is_err());
}

#[test]
fn enqueue_stores_step_with_parameters() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join(".stepagent");
    write_settings(&root);

    let output = run_cli(cli(
        &root,
        &[
            "enqueue",
            "100",
            "1",
            "Sync",
            "--dataset",
            "QC_Shew_01",
            "--param",
            "RunJobRemotely=false",
        ],
    ))
    .expect("enqueue");
    assert_eq!(output.exit_code, 0);
    assert!(output.text.contains("job=100"));

    let queue = SqliteTaskQueue::open(
        &root.join("queue.sqlite3"),
        "pub-1",
        Duration::from_millis(100),
    )
    .expect("open queue");
    let row = queue.step_row(100, 1).expect("row").expect("stored step");
    assert_eq!(row.tool, "Sync");
    assert_eq!(row.state, "pending");
    assert_eq!(row.attempts, 0);

    let err = run_cli(cli(&root, &["enqueue", "100", "1", "Sync"])).expect_err("duplicate");
    assert!(err.contains("100"));
}

#[test]
fn manifest_check_reports_unregistered_classes() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join(".stepagent");
    write_settings(&root);

    let err = run_cli(cli(&root, &["manifest", "check", "Sync"])).expect_err("missing class");
    assert!(err.contains("stager=StagerNoResources"));
    assert!(err.contains("registered=true"));
    assert!(err.contains("executor class `ExecutorDeconTools` is not registered"));
}

#[test]
fn abort_then_status_reports_marker_and_idle_agent() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join(".stepagent");
    write_settings(&root);

    let output = run_cli(cli(&root, &["abort"])).expect("abort");
    assert!(output.text.starts_with("abort requested"));
    assert!(root.join("AbortProcessingNow.txt").is_file());

    let status = run_cli(cli(&root, &["status"])).expect("status");
    assert!(status.text.contains("agent=not running"));
    assert!(status.text.contains("no status written yet"));
}
