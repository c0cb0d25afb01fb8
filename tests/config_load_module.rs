use std::fs;
use stepagent::config::{load_settings, CleanupMode, ConfigError};
use tempfile::tempdir;

#[test]
fn load_settings_reads_yaml_and_resolves_state_relative_paths() {
    let dir = tempdir().expect("tempdir");
    let work = dir.path().join("work");
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        format!(
            r#"
manager:
  name: Pub-12
  working_dir: {}
  step_tools: [Sync, MSXML_Gen]
recovery:
  cleanup_mode: clean_once
remote:
  default_host: proto-7
  hosts:
    proto-7:
      root: /mnt/proto-7
"#,
            work.display()
        ),
    )
    .expect("write settings");

    let settings = load_settings(&path).expect("load settings");
    assert_eq!(settings.manager_name(), "Pub-12");
    assert_eq!(settings.recovery.cleanup_mode, CleanupMode::CleanOnce);
    assert!(settings.accepts_step_tool("sync"));
    assert!(!settings.accepts_step_tool("Decon"));
    assert_eq!(
        settings.resolve_queue_database(dir.path()),
        dir.path().join("queue.sqlite3")
    );
    let (host, _) = settings.resolve_remote_host(Some("")).expect("default host");
    assert_eq!(host, "proto-7");
}

#[test]
fn load_settings_reports_missing_and_malformed_files() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("config.yaml");
    assert!(matches!(
        load_settings(&missing),
        Err(ConfigError::Read { .. })
    ));

    fs::write(&missing, "manager: [unclosed").expect("write settings");
    assert!(matches!(
        load_settings(&missing),
        Err(ConfigError::Parse { .. })
    ));
}
