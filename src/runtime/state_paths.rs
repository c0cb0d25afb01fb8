use super::RuntimeError;
use crate::config::{DEFAULT_STATE_DIR, SETTINGS_FILE_NAME};
use std::fs;
use std::path::PathBuf;

/// Files the agent keeps in its state root. Everything here survives a crash and is read
/// back by the next process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        vec![self.root.clone(), self.root.join("logs")]
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE_NAME)
    }

    pub fn runtime_log_path(&self) -> PathBuf {
        self.root.join("logs/runtime.log")
    }

    pub fn status_flag_path(&self) -> PathBuf {
        self.root.join("flag_file.txt")
    }

    pub fn error_deleting_flag_path(&self) -> PathBuf {
        self.root.join("flag_file_error_deleting.txt")
    }

    pub fn periodic_messages_path(&self) -> PathBuf {
        self.root.join("PeriodicErrorMessages.txt")
    }

    pub fn abort_marker_path(&self) -> PathBuf {
        self.root.join("AbortProcessingNow.txt")
    }

    pub fn disabled_local_path(&self) -> PathBuf {
        self.root.join("disabled_local.json")
    }

    pub fn paused_until_path(&self) -> PathBuf {
        self.root.join("paused_until.json")
    }

    pub fn status_file_path(&self) -> PathBuf {
        self.root.join("status.json")
    }

    pub fn agent_lock_path(&self) -> PathBuf {
        self.root.join("agent.lock")
    }
}

pub fn default_state_root_path() -> Result<PathBuf, RuntimeError> {
    let home = std::env::var_os("HOME").ok_or(RuntimeError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home).join(DEFAULT_STATE_DIR))
}

pub fn bootstrap_state_root(paths: &StatePaths) -> Result<(), RuntimeError> {
    for path in paths.required_directories() {
        fs::create_dir_all(&path).map_err(|source| RuntimeError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}
