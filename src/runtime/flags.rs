use super::{atomic_write_json, now_secs, remove_if_exists, RuntimeError, StatePaths};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// On-disk crash markers. Presence alone is the signal; the body is for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashFlag {
    /// The previous run did not finish cleaning up after a task.
    Status,
    /// Cleaning the working directory itself failed, usually a held file handle.
    ErrorDeletingFiles,
}

impl CrashFlag {
    pub fn path(self, paths: &StatePaths) -> PathBuf {
        match self {
            Self::Status => paths.status_flag_path(),
            Self::ErrorDeletingFiles => paths.error_deleting_flag_path(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Status => "status flag",
            Self::ErrorDeletingFiles => "error-deleting-files flag",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub created_at: i64,
    pub pid: u32,
    pub context: String,
}

pub fn create_flag(paths: &StatePaths, flag: CrashFlag, context: &str) -> Result<(), RuntimeError> {
    let path = flag.path(paths);
    let record = FlagRecord {
        created_at: now_secs(),
        pid: std::process::id(),
        context: context.to_string(),
    };
    atomic_write_json(&path, &record).map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })
}

pub fn flag_exists(paths: &StatePaths, flag: CrashFlag) -> bool {
    flag.path(paths).is_file()
}

/// Reads the marker body. A marker that exists but cannot be parsed still counts as set;
/// this only returns `None` when there is nothing readable.
pub fn read_flag(paths: &StatePaths, flag: CrashFlag) -> Option<FlagRecord> {
    let raw = fs::read_to_string(flag.path(paths)).ok()?;
    serde_json::from_str(&raw).ok()
}

pub fn clear_flag(paths: &StatePaths, flag: CrashFlag) -> Result<bool, RuntimeError> {
    let path = flag.path(paths);
    remove_if_exists(&path).map_err(|source| RuntimeError::RemoveState {
        path: path.display().to_string(),
        source,
    })
}

/// Abort marker dropped by an operator. Consuming it removes it so the next run proceeds.
pub fn take_abort_request(paths: &StatePaths) -> bool {
    let path = paths.abort_marker_path();
    if !path.exists() {
        return false;
    }
    if let Err(err) = remove_if_exists(&path) {
        tracing::error!(
            "failed to remove abort marker {}; later runs will abort too: {err}",
            path.display()
        );
    }
    true
}

pub fn request_abort(paths: &StatePaths) -> Result<(), RuntimeError> {
    let path = paths.abort_marker_path();
    super::atomic_write_file(&path, b"abort requested\n").map_err(|source| {
        RuntimeError::WriteState {
            path: path.display().to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn flags_are_created_read_and_cleared() {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path());

        assert!(!flag_exists(&paths, CrashFlag::Status));
        create_flag(&paths, CrashFlag::Status, "Job100_Step1").expect("create flag");
        assert!(flag_exists(&paths, CrashFlag::Status));
        assert!(!flag_exists(&paths, CrashFlag::ErrorDeletingFiles));

        let record = read_flag(&paths, CrashFlag::Status).expect("record");
        assert_eq!(record.context, "Job100_Step1");
        assert_eq!(record.pid, std::process::id());

        assert!(clear_flag(&paths, CrashFlag::Status).expect("clear"));
        assert!(!clear_flag(&paths, CrashFlag::Status).expect("clear twice"));
    }

    #[test]
    fn unreadable_flag_still_counts_as_present() {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path());
        fs::write(paths.status_flag_path(), "garbage").expect("write flag");
        assert!(flag_exists(&paths, CrashFlag::Status));
        assert!(read_flag(&paths, CrashFlag::Status).is_none());
    }

    #[test]
    fn abort_request_is_consumed_once() {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path());
        assert!(!take_abort_request(&paths));
        request_abort(&paths).expect("request abort");
        assert!(take_abort_request(&paths));
        assert!(!take_abort_request(&paths));
    }

    #[test]
    fn abort_marker_that_cannot_be_removed_still_aborts() {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path());
        fs::create_dir_all(paths.abort_marker_path()).expect("marker dir");
        assert!(take_abort_request(&paths));
        assert!(paths.abort_marker_path().exists());
        assert!(take_abort_request(&paths));
    }
}
