use std::fs;
use std::path::{Path, PathBuf};
use stepagent::config::RemoteSettings;
use stepagent::plugins::{EventLog, PluginContext, TaskDirectories, ToolExecutor};
use stepagent::remote::{
    poll_remote_task, query_status, stage_task, MountedRemote, RemoteObservation, RemoteState,
    RemoteTransfer, RuntimeSync,
};
use stepagent::shared::time::now_secs;
use stepagent::task::{CloseoutCode, Task};
use tempfile::tempdir;

struct RemoteOnlyExecutor;

impl ToolExecutor for RemoteOnlyExecutor {
    fn run(&mut self, _task: &mut Task, _ctx: &mut PluginContext<'_>) -> CloseoutCode {
        CloseoutCode::Failed
    }
}

struct Layout {
    _dir: tempfile::TempDir,
    remote_root: PathBuf,
    dirs: TaskDirectories,
}

fn layout() -> Layout {
    let dir = tempdir().expect("tempdir");
    let remote_root = dir.path().join("remote");
    let dirs = TaskDirectories {
        working_dir: dir.path().join("work"),
        transfer_dir: Some(dir.path().join("transfer")),
        cache_dir: None,
        failed_results_dir: Some(dir.path().join("failed")),
    };
    fs::create_dir_all(&remote_root).expect("remote root");
    fs::create_dir_all(&dirs.working_dir).expect("work dir");
    Layout {
        _dir: dir,
        remote_root,
        dirs,
    }
}

fn staged_task(layout: &Layout, remote: &MountedRemote) -> Task {
    let mut task = Task::new(100, 1, "MSXML_Gen", "QC_Shew_01");
    fs::write(layout.dirs.working_dir.join("input.raw"), b"spectra").expect("input");
    stage_task(
        remote,
        &mut RuntimeSync::default(),
        None,
        &mut task,
        &layout.dirs.working_dir,
        "pub-1",
        now_secs(),
    )
    .expect("stage");
    task
}

fn poll(
    layout: &Layout,
    remote: &MountedRemote,
    task: &mut Task,
    now: i64,
) -> (CloseoutCode, String, EventLog) {
    let mut events = EventLog::default();
    let mut ctx = PluginContext {
        events: &mut events,
        remote: Some(remote as &dyn RemoteTransfer),
        dirs: &layout.dirs,
    };
    let result = poll_remote_task(
        task,
        &mut RemoteOnlyExecutor,
        &mut ctx,
        &RemoteSettings::default(),
        now,
    )
    .expect("poll");
    (result.code, result.message, events)
}

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("parent dir");
    fs::write(path, body).expect("write remote file");
}

#[test]
fn staging_copies_inputs_then_writes_info_file() {
    let layout = layout();
    let remote = MountedRemote::new("proto-7", &layout.remote_root);
    let task = staged_task(&layout, &remote);

    let descriptor = task.remote.as_ref().expect("descriptor");
    assert_eq!(descriptor.host, "proto-7");
    assert_eq!(descriptor.state, RemoteState::Unstarted);
    assert!(layout
        .remote_root
        .join("work/Job100_Step1/input.raw")
        .is_file());
    let info = fs::read_to_string(layout.remote_root.join("tasks/Job100_Step1.info"))
        .expect("info file");
    assert!(info.contains("input.raw"));

    let report = query_status(&remote, descriptor, 3600, now_secs()).expect("query");
    assert_eq!(report.observation, RemoteObservation::Unstarted);
}

#[test]
fn remote_step_moves_forward_to_success_and_brings_results_home() {
    let layout = layout();
    let remote = MountedRemote::new("proto-7", &layout.remote_root);
    let mut task = staged_task(&layout, &remote);
    let now = now_secs();

    let (code, _, _) = poll(&layout, &remote, &mut task, now);
    assert_eq!(code, CloseoutCode::RunningRemote);

    write(&layout.remote_root, "tasks/Job100_Step1.lock", "pid 4412");
    write(
        &layout.remote_root,
        "work/Job100_Step1/Job100_Step1_status.json",
        r#"{"state": "running", "progress": 42.5, "message": "converting"}"#,
    );
    let (code, _, events) = poll(&layout, &remote, &mut task, now + 300);
    assert_eq!(code, CloseoutCode::RunningRemote);
    assert!(events.errors().is_empty());
    let descriptor = task.remote.as_ref().expect("descriptor");
    assert_eq!(descriptor.state, RemoteState::Running);
    assert_eq!(descriptor.started_at, Some(now + 300));

    write(&layout.remote_root, "work/Job100_Step1/result.mzML", "<mzML/>");
    write(
        &layout.remote_root,
        "tasks/Job100_Step1.success",
        r#"{"result_code": "success", "message": "converted", "result_files": ["result.mzML"]}"#,
    );
    let (code, message, _) = poll(&layout, &remote, &mut task, now + 600);
    assert_eq!(code, CloseoutCode::Success);
    assert_eq!(message, "converted");

    let transfer = layout
        .dirs
        .transfer_dir
        .as_ref()
        .expect("transfer")
        .join("QC_Shew_01");
    assert!(transfer.join("result.mzML").is_file());
    assert!(!layout.remote_root.join("tasks/Job100_Step1.info").exists());
    assert!(!layout.remote_root.join("work/Job100_Step1").exists());

    let mut descriptor = task.remote.clone().expect("descriptor");
    assert_eq!(descriptor.state, RemoteState::Success);
    assert_eq!(
        descriptor.observe(RemoteObservation::Running, now + 900),
        RemoteState::Success
    );
    assert_eq!(
        descriptor.observe(RemoteObservation::Failed, now + 900),
        RemoteState::Success
    );
}

#[test]
fn success_status_without_marker_is_a_failure() {
    let layout = layout();
    let remote = MountedRemote::new("proto-7", &layout.remote_root);
    let mut task = staged_task(&layout, &remote);
    write(
        &layout.remote_root,
        "work/Job100_Step1/Job100_Step1_status.json",
        r#"{"state": "complete", "progress": 100}"#,
    );

    let (code, message, _) = poll(&layout, &remote, &mut task, now_secs());
    assert_eq!(code, CloseoutCode::FailedRemote);
    assert!(message.contains("without a success marker"));
}

#[test]
fn unparseable_success_marker_is_a_failure() {
    let layout = layout();
    let remote = MountedRemote::new("proto-7", &layout.remote_root);
    let mut task = staged_task(&layout, &remote);
    write(&layout.remote_root, "tasks/Job100_Step1.success", "done!");

    let (code, message, _) = poll(&layout, &remote, &mut task, now_secs());
    assert_eq!(code, CloseoutCode::FailedRemote);
    assert!(message.contains("success marker is unusable"));
    assert_eq!(
        task.remote.as_ref().expect("descriptor").state,
        RemoteState::Failed
    );
}

#[test]
fn fail_marker_archives_partial_results() {
    let layout = layout();
    let remote = MountedRemote::new("proto-7", &layout.remote_root);
    let mut task = staged_task(&layout, &remote);
    write(&layout.remote_root, "work/Job100_Step1/partial.log", "oom");
    write(
        &layout.remote_root,
        "tasks/Job100_Step1.fail",
        r#"{"code": "failed", "completionMessage": "worker ran out of memory"}"#,
    );

    let (code, message, events) = poll(&layout, &remote, &mut task, now_secs());
    assert_eq!(code, CloseoutCode::FailedRemote);
    assert_eq!(message, "worker ran out of memory");
    assert_eq!(events.errors(), vec!["worker ran out of memory"]);
    let archived = layout
        .dirs
        .failed_results_dir
        .as_ref()
        .expect("failed dir")
        .join("Job100_Step1/partial.log");
    assert!(archived.is_file());
}

#[test]
fn stale_lock_file_is_reported_while_still_running() {
    let layout = layout();
    let remote = MountedRemote::new("proto-7", &layout.remote_root);
    let mut task = staged_task(&layout, &remote);
    write(&layout.remote_root, "tasks/Job100_Step1.lock", "pid 4412");

    let five_hours_later = now_secs() + 5 * 3600;
    let (code, _, events) = poll(&layout, &remote, &mut task, five_hours_later);
    assert_eq!(code, CloseoutCode::RunningRemote);
    assert!(events
        .warnings()
        .iter()
        .any(|warning| warning.starts_with("StaleFile:")));
}

#[test]
fn vanished_remote_files_fail_after_too_many_undefined_polls() {
    let layout = layout();
    let remote = MountedRemote::new("proto-7", &layout.remote_root);
    let mut task = staged_task(&layout, &remote);
    fs::remove_file(layout.remote_root.join("tasks/Job100_Step1.info")).expect("remove info");

    let limit = RemoteSettings::default().max_undefined_polls;
    let now = now_secs();
    for poll_index in 0..limit {
        let (code, _, _) = poll(&layout, &remote, &mut task, now + i64::from(poll_index));
        assert_eq!(code, CloseoutCode::RunningRemote);
    }
    let (code, _, _) = poll(&layout, &remote, &mut task, now + i64::from(limit));
    assert_eq!(code, CloseoutCode::FailedRemote);
}

#[test]
fn camel_case_no_data_marker_closes_no_data_and_keeps_results() {
    let layout = layout();
    let remote = MountedRemote::new("proto-7", &layout.remote_root);
    let mut task = staged_task(&layout, &remote);
    write(&layout.remote_root, "work/Job100_Step1/scan_summary.txt", "0 spectra");
    write(
        &layout.remote_root,
        "tasks/Job100_Step1.success",
        r#"{"resultCode": "NoData", "completionMessage": "no spectra above threshold"}"#,
    );

    let (code, message, _) = poll(&layout, &remote, &mut task, now_secs());
    assert_eq!(code, CloseoutCode::NoData);
    assert_eq!(message, "no spectra above threshold");
    let transfer = layout
        .dirs
        .transfer_dir
        .as_ref()
        .expect("transfer")
        .join("QC_Shew_01");
    assert!(transfer.join("scan_summary.txt").is_file());
}

#[test]
fn failure_code_in_success_marker_archives_results() {
    let layout = layout();
    let remote = MountedRemote::new("proto-7", &layout.remote_root);
    let mut task = staged_task(&layout, &remote);
    write(&layout.remote_root, "work/Job100_Step1/console.log", "missing input");
    write(
        &layout.remote_root,
        "tasks/Job100_Step1.success",
        r#"{"result_code": "FileNotFound", "message": "input.raw not found"}"#,
    );

    let (code, _, _) = poll(&layout, &remote, &mut task, now_secs());
    assert_eq!(code, CloseoutCode::FileNotFound);
    let archived = layout
        .dirs
        .failed_results_dir
        .as_ref()
        .expect("failed dir")
        .join("Job100_Step1/console.log");
    assert!(archived.is_file());
}
