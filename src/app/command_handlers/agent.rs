use super::CommandOutput;
use crate::app::cli::RunArgs;
use crate::app::command_support::{load_agent_settings, open_queue};
use crate::config::ConfigWatcher;
use crate::dispatch::DispatchLoop;
use crate::queue::TaskQueue;
use crate::runtime::{
    append_runtime_log, ownership_state, request_abort, AgentLock, OwnershipState, StatePaths,
    StatusFile,
};
use crate::shared::logging::init_tracing;
use std::time::Duration;

const SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub fn cmd_run(paths: &StatePaths, args: &RunArgs) -> Result<CommandOutput, String> {
    let settings = load_agent_settings(paths)?;
    init_tracing(settings.manager.debug_level);
    let _lock = AgentLock::acquire(paths).map_err(|e| e.to_string())?;

    let mut queue = open_queue(paths, &settings)?;
    match queue.recover_orphaned_claims() {
        Ok(0) => {}
        Ok(recovered) => append_runtime_log(
            paths,
            "warn",
            "queue.recovered",
            &format!("returned {recovered} orphaned claims to the queue"),
        ),
        Err(err) => tracing::warn!("failed to recover orphaned claims: {err}"),
    }

    let settings_file = paths.settings_file();
    let watcher = ConfigWatcher::spawn(settings_file.clone(), SETTINGS_POLL_INTERVAL);
    let mut dispatch =
        DispatchLoop::new(paths.clone(), settings, queue).with_watcher(settings_file, watcher);
    let reason = dispatch.run(args.max_iterations);

    Ok(CommandOutput {
        text: format!("stopped\nreason={}", reason.as_str()),
        exit_code: reason.exit_code(),
    })
}

pub fn cmd_status(paths: &StatePaths) -> Result<String, String> {
    let ownership = match ownership_state(paths).map_err(|e| e.to_string())? {
        OwnershipState::Running { pid } => format!("running pid={pid}"),
        OwnershipState::Stale => "stale lock".to_string(),
        OwnershipState::NotRunning => "not running".to_string(),
    };
    let status = match StatusFile::read(paths) {
        Some(status) => serde_json::to_string_pretty(&status).map_err(|e| e.to_string())?,
        None => "no status written yet".to_string(),
    };
    Ok(format!(
        "state_root={}\nagent={ownership}\n{status}",
        paths.root.display()
    ))
}

pub fn cmd_abort(paths: &StatePaths) -> Result<String, String> {
    request_abort(paths).map_err(|e| e.to_string())?;
    Ok(format!(
        "abort requested\nmarker={}",
        paths.abort_marker_path().display()
    ))
}
