use super::{append_runtime_log, RuntimeError, StatePaths};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    NotRunning,
    Running { pid: u32 },
    Stale,
}

/// Single-instance guard for one state root. Holding it means this process owns the
/// working directory and crash markers. Dropping it removes `agent.lock`.
#[derive(Debug)]
pub struct AgentLock {
    path: PathBuf,
    pid: u32,
}

impl AgentLock {
    pub fn acquire(paths: &StatePaths) -> Result<Self, RuntimeError> {
        match ownership_state(paths)? {
            OwnershipState::Running { pid } => return Err(RuntimeError::AlreadyRunning { pid }),
            OwnershipState::Stale => {
                append_runtime_log(
                    paths,
                    "warn",
                    "agent.lock.stale",
                    "removing lock left by a process that is no longer running",
                );
                let _ = fs::remove_file(paths.agent_lock_path());
            }
            OwnershipState::NotRunning => {}
        }
        reserve_start_lock(paths)?;
        Ok(Self {
            path: paths.agent_lock_path(),
            pid: std::process::id(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for AgentLock {
    fn drop(&mut self) {
        if read_pid(&self.path).ok().flatten() == Some(self.pid) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

pub fn ownership_state(paths: &StatePaths) -> Result<OwnershipState, RuntimeError> {
    let path = paths.agent_lock_path();
    if !path.exists() {
        return Ok(OwnershipState::NotRunning);
    }
    match read_pid(&path)? {
        Some(pid) if is_process_alive(pid) => Ok(OwnershipState::Running { pid }),
        _ => Ok(OwnershipState::Stale),
    }
}

fn reserve_start_lock(paths: &StatePaths) -> Result<(), RuntimeError> {
    let path = paths.agent_lock_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RuntimeError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }
    fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)
        .and_then(|mut file| file.write_all(std::process::id().to_string().as_bytes()))
        .map_err(|source| RuntimeError::WriteLock {
            path: path.display().to_string(),
            source,
        })
}

fn read_pid(path: &std::path::Path) -> Result<Option<u32>, RuntimeError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw.trim().parse::<u32>().ok()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RuntimeError::ReadLock {
            path: path.display().to_string(),
            source,
        }),
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // Signal 0 performs the permission and existence checks without delivering anything.
        let rc = unsafe { libc::kill(raw, 0) };
        if rc == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(0));
    }

    #[test]
    fn lock_file_is_removed_on_drop() {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path());
        {
            let lock = AgentLock::acquire(&paths).expect("acquire");
            assert_eq!(lock.pid(), std::process::id());
            assert!(paths.agent_lock_path().is_file());
        }
        assert!(!paths.agent_lock_path().exists());
    }
}
