pub mod backoff;
pub mod flags;
pub mod logging;
pub mod ownership_lock;
pub mod pause;
pub mod periodic_log;
pub mod recovery;
pub mod state_paths;
pub mod status_file;

pub use crate::shared::errors::RuntimeError;
pub(crate) use crate::shared::fs_atomic::{atomic_write_file, atomic_write_json, remove_if_exists};
pub(crate) use crate::shared::time::now_secs;
pub use backoff::{backoff_delay, Pacer, RecordingPacer, ThreadPacer};
pub use flags::{
    clear_flag, create_flag, flag_exists, read_flag, request_abort, take_abort_request,
    CrashFlag, FlagRecord,
};
pub use logging::append_runtime_log;
pub use ownership_lock::{is_process_alive, ownership_state, AgentLock, OwnershipState};
pub use pause::{
    active_pause, disable_locally, local_disable, pause_until, LocalDisable, PauseRecord,
};
pub use periodic_log::{CentralLog, MessageClass, PeriodicIntervals, PeriodicLogger};
pub use recovery::clean_working_directory;
pub use state_paths::{bootstrap_state_root, default_state_root_path, StatePaths};
pub use status_file::{AgentStatus, ManagerStatus, StatusEventSink, StatusFile, TaskStatus};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn bootstrap_creates_required_directories() {
        let dir = tempdir().expect("temp dir");
        let paths = StatePaths::new(dir.path().join("state"));
        bootstrap_state_root(&paths).expect("bootstrap succeeds");

        for required in paths.required_directories() {
            assert!(
                required.is_dir(),
                "missing directory: {}",
                required.display()
            );
        }
    }

    #[test]
    fn settings_file_lives_in_state_root() {
        let paths = StatePaths::new("/tmp/.stepagent");
        assert_eq!(
            paths.settings_file(),
            PathBuf::from("/tmp/.stepagent/config.yaml")
        );
    }

    #[test]
    fn default_state_root_path_uses_home() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let dir = tempdir().expect("temp dir");
        let old_home = std::env::var_os("HOME");
        std::env::set_var("HOME", dir.path());

        let root = default_state_root_path().expect("resolve state root");
        assert_eq!(root, dir.path().join(".stepagent"));

        if let Some(value) = old_home {
            std::env::set_var("HOME", value);
        } else {
            std::env::remove_var("HOME");
        }
    }
}
