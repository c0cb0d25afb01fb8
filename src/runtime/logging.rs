use super::StatePaths;
use std::fs;
use std::io::Write;

/// Appends one JSON line to `logs/runtime.log` and mirrors it to tracing.
/// Lifecycle events land here so they outlive the process's stderr.
pub fn append_runtime_log(paths: &StatePaths, level: &str, event: &str, message: &str) {
    match level {
        "error" => tracing::error!(event, "{message}"),
        "warn" => tracing::warn!(event, "{message}"),
        "debug" => tracing::debug!(event, "{message}"),
        _ => tracing::info!(event, "{message}"),
    }

    let payload = serde_json::json!({
        "timestamp": super::now_secs(),
        "level": level,
        "event": event,
        "message": message,
    });

    let Ok(line) = serde_json::to_string(&payload) else {
        return;
    };

    let path = paths.runtime_log_path();
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };
    let _ = writeln!(file, "{line}");
}
