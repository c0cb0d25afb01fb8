use crate::shared::fs_atomic::{atomic_write_file, remove_if_exists};
use crate::shared::time::system_time_secs;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("remote path `{path}` must be relative and stay inside the host root")]
    InvalidPath { path: String },
    #[error("invalid marker file {path}: {reason}")]
    Marker { path: String, reason: String },
    #[error("no remote host named `{name}` is configured")]
    UnknownHost { name: String },
    #[error("task {stem} has no remote descriptor")]
    MissingDescriptor { stem: String },
}

fn io_err(path: &Path, source: std::io::Error) -> RemoteError {
    RemoteError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileInfo {
    pub name: String,
    pub modified_at: i64,
    pub size: u64,
}

/// File operations against one remote host. Paths are relative to the host root and use
/// `/` separators.
pub trait RemoteTransfer {
    fn host_name(&self) -> &str;

    fn put_file(&self, local: &Path, remote_rel: &str) -> Result<(), RemoteError>;

    /// Writes `content` so readers on the remote side never see a partial file.
    fn write_file(&self, remote_rel: &str, content: &[u8]) -> Result<(), RemoteError>;

    fn read_file(&self, remote_rel: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    fn stat(&self, remote_rel: &str) -> Result<Option<RemoteFileInfo>, RemoteError>;

    /// Regular files directly under `remote_rel`, sorted by name. Missing dirs list empty.
    fn list_files(&self, remote_rel: &str) -> Result<Vec<RemoteFileInfo>, RemoteError>;

    fn get_file(&self, remote_rel: &str, local: &Path) -> Result<(), RemoteError>;

    fn remove_file(&self, remote_rel: &str) -> Result<bool, RemoteError>;

    fn remove_dir_all(&self, remote_rel: &str) -> Result<(), RemoteError>;
}

/// A remote host whose share is mounted into the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedRemote {
    name: String,
    root: PathBuf,
}

impl MountedRemote {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, remote_rel: &str) -> Result<PathBuf, RemoteError> {
        let relative = Path::new(remote_rel);
        let valid = !remote_rel.trim().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(RemoteError::InvalidPath {
                path: remote_rel.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn file_info(path: &Path, metadata: &fs::Metadata) -> RemoteFileInfo {
    RemoteFileInfo {
        name: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        modified_at: metadata.modified().map(system_time_secs).unwrap_or(0),
        size: metadata.len(),
    }
}

impl RemoteTransfer for MountedRemote {
    fn host_name(&self) -> &str {
        &self.name
    }

    fn put_file(&self, local: &Path, remote_rel: &str) -> Result<(), RemoteError> {
        let target = self.resolve(remote_rel)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::copy(local, &target).map_err(|e| io_err(&target, e))?;
        Ok(())
    }

    fn write_file(&self, remote_rel: &str, content: &[u8]) -> Result<(), RemoteError> {
        let target = self.resolve(remote_rel)?;
        atomic_write_file(&target, content).map_err(|e| io_err(&target, e))
    }

    fn read_file(&self, remote_rel: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let target = self.resolve(remote_rel)?;
        match fs::read(&target) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(&target, err)),
        }
    }

    fn stat(&self, remote_rel: &str) -> Result<Option<RemoteFileInfo>, RemoteError> {
        let target = self.resolve(remote_rel)?;
        match fs::metadata(&target) {
            Ok(metadata) => Ok(Some(file_info(&target, &metadata))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(&target, err)),
        }
    }

    fn list_files(&self, remote_rel: &str) -> Result<Vec<RemoteFileInfo>, RemoteError> {
        let dir = self.resolve(remote_rel)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&dir, err)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let metadata = entry.metadata().map_err(|e| io_err(&entry.path(), e))?;
            if metadata.is_file() {
                files.push(file_info(&entry.path(), &metadata));
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn get_file(&self, remote_rel: &str, local: &Path) -> Result<(), RemoteError> {
        let source = self.resolve(remote_rel)?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::copy(&source, local).map_err(|e| io_err(&source, e))?;
        Ok(())
    }

    fn remove_file(&self, remote_rel: &str) -> Result<bool, RemoteError> {
        let target = self.resolve(remote_rel)?;
        remove_if_exists(&target).map_err(|e| io_err(&target, e))
    }

    fn remove_dir_all(&self, remote_rel: &str) -> Result<(), RemoteError> {
        let target = self.resolve(remote_rel)?;
        match fs::remove_dir_all(&target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&target, err)),
        }
    }
}
