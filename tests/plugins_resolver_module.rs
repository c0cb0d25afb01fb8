use std::fs;
use std::path::Path;
use stepagent::config::Settings;
use stepagent::plugins::{
    EventLog, PluginContext, PluginError, PluginKind, PluginRegistry, PluginResolver,
    TaskDirectories,
};
use stepagent::task::{CloseoutCode, Task};
use tempfile::tempdir;

const MANIFEST: &str = r#"
stagers:
  - tool: MSXML_Gen
    class: StagerNoResources
  - tool: Sync
    class: StagerNoResources
executors:
  - tool: MSXML_Gen
    class: ExecutorCommand
    module: "true"
  - tool: Sync
    class: ExecutorCommand
    module: "false"
  - tool: Decon
    class: ExecutorDeconTools
"#;

fn resolver_with_manifest(root: &Path) -> (PluginResolver, Settings) {
    fs::write(root.join("plugins.yaml"), MANIFEST).expect("manifest");
    let settings = Settings::for_manager("pub-1", root.join("work"));
    fs::create_dir_all(root.join("work")).expect("work dir");
    (
        PluginResolver::new(root, PluginRegistry::with_builtins()),
        settings,
    )
}

fn run_executor(
    resolver: &mut PluginResolver,
    settings: &Settings,
    task: &mut Task,
) -> CloseoutCode {
    let mut executor = match resolver.resolve_executor(&task.tool, settings) {
        Ok(executor) => executor,
        Err(err) => panic!("executor should resolve: {err}"),
    };
    let dirs = TaskDirectories::from_settings(settings);
    let mut events = EventLog::default();
    let mut ctx = PluginContext {
        events: &mut events,
        remote: None,
        dirs: &dirs,
    };
    executor.run(task, &mut ctx)
}

#[test]
fn test_prefixed_tool_falls_back_to_base_entry() {
    let dir = tempdir().expect("tempdir");
    let (resolver, settings) = resolver_with_manifest(dir.path());

    let entry = resolver
        .lookup(PluginKind::Executor, "Test_MSXML_Gen", &settings)
        .expect("fallback entry");
    assert_eq!(entry.tool, "MSXML_Gen");
    let entry = resolver
        .lookup(PluginKind::Stager, "sync", &settings)
        .expect("case-insensitive entry");
    assert_eq!(entry.class, "StagerNoResources");
}

#[test]
fn unknown_tool_is_reported_once_at_error_then_remembered() {
    let dir = tempdir().expect("tempdir");
    let (mut resolver, settings) = resolver_with_manifest(dir.path());
    assert!(!resolver.has_reported(PluginKind::Executor, "Inspector"));

    let err = resolver
        .resolve_executor("Inspector", &settings)
        .err()
        .expect("unknown tool");
    assert!(matches!(err, PluginError::UnknownTool { kind: "executor", .. }));
    assert!(resolver.has_reported(PluginKind::Executor, "Inspector"));
    assert!(!resolver.has_reported(PluginKind::Stager, "Inspector"));

    assert!(resolver.resolve_executor("inspector", &settings).is_err());
    assert!(resolver.has_reported(PluginKind::Executor, "INSPECTOR"));
}

#[test]
fn manifest_class_missing_from_registry_fails_resolution() {
    let dir = tempdir().expect("tempdir");
    let (mut resolver, settings) = resolver_with_manifest(dir.path());

    let err = resolver
        .resolve_executor("Decon", &settings)
        .err()
        .expect("unregistered class");
    assert!(
        matches!(err, PluginError::UnknownClass { ref class } if class == "ExecutorDeconTools")
    );
}

#[test]
fn manifest_edits_apply_without_rebuilding_the_resolver() {
    let dir = tempdir().expect("tempdir");
    let (mut resolver, settings) = resolver_with_manifest(dir.path());
    assert!(resolver.resolve_stager("Decon", &settings).is_err());

    let updated = format!("{MANIFEST}\n")
        .replace("stagers:\n", "stagers:\n  - tool: Decon\n    class: StagerNoResources\n");
    fs::write(dir.path().join("plugins.yaml"), updated).expect("rewrite manifest");
    assert!(resolver.resolve_stager("Decon", &settings).is_ok());
}

#[cfg(unix)]
#[test]
fn builtin_command_executor_resolves_and_maps_exit_status() {
    let dir = tempdir().expect("tempdir");
    let (mut resolver, settings) = resolver_with_manifest(dir.path());

    let mut passing = Task::new(7, 1, "MSXML_Gen", "QC_Shew_01");
    assert_eq!(
        run_executor(&mut resolver, &settings, &mut passing),
        CloseoutCode::Success
    );

    let mut failing = Task::new(7, 2, "Sync", "QC_Shew_01");
    assert_eq!(
        run_executor(&mut resolver, &settings, &mut failing),
        CloseoutCode::Failed
    );
    assert!(failing.completion_message.contains("false exited with 1"));
}
