use crate::config::{load_settings, Settings};
use crate::queue::SqliteTaskQueue;
use crate::runtime::{bootstrap_state_root, default_state_root_path, StatePaths};
use std::path::Path;
use std::time::Duration;

pub fn ensure_runtime_root(state_root: Option<&Path>) -> Result<StatePaths, String> {
    let root = match state_root {
        Some(root) => root.to_path_buf(),
        None => default_state_root_path().map_err(|e| e.to_string())?,
    };
    let paths = StatePaths::new(root);
    bootstrap_state_root(&paths).map_err(|e| e.to_string())?;
    Ok(paths)
}

pub fn load_agent_settings(paths: &StatePaths) -> Result<Settings, String> {
    load_settings(&paths.settings_file()).map_err(|e| e.to_string())
}

pub fn open_queue(paths: &StatePaths, settings: &Settings) -> Result<SqliteTaskQueue, String> {
    SqliteTaskQueue::open(
        &settings.resolve_queue_database(&paths.root),
        settings.manager_name(),
        Duration::from_millis(settings.queue.busy_timeout_ms),
    )
    .map_err(|e| e.to_string())
}
