use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiskRole {
    WorkingDirectory,
    TransferDirectory,
    CacheDirectory,
    ReferenceDatabase,
    DatasetStorage,
}

impl DiskRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkingDirectory => "working directory",
            Self::TransferDirectory => "transfer directory",
            Self::CacheDirectory => "cache directory",
            Self::ReferenceDatabase => "reference database directory",
            Self::DatasetStorage => "dataset storage",
        }
    }
}

/// What the agent does about a directory that is short on space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskPolicy {
    /// Stop claiming until an operator clears the local-disable flag.
    DisableLocally,
    /// Stop claiming for `disk.pause_hours`.
    PauseTemporarily,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRequirement {
    pub role: DiskRole,
    pub path: PathBuf,
    pub min_free_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PreflightFailure {
    pub role: DiskRole,
    pub path: PathBuf,
    pub message: String,
}

impl PreflightFailure {
    pub fn policy(&self) -> DiskPolicy {
        match self.role {
            DiskRole::WorkingDirectory => DiskPolicy::DisableLocally,
            _ => DiskPolicy::PauseTemporarily,
        }
    }
}

pub trait FreeSpaceProbe {
    fn free_mb(&self, path: &Path) -> std::io::Result<u64>;
}

/// Reads free space from the filesystem with `statvfs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl FreeSpaceProbe for StatvfsProbe {
    #[cfg(unix)]
    fn free_mb(&self, path: &Path) -> std::io::Result<u64> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
        let mut stats = std::mem::MaybeUninit::<libc::statvfs>::zeroed();
        // SAFETY: c_path is NUL-terminated and stats points to writable memory of the right size.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), stats.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // SAFETY: statvfs returned success, so the struct is initialised.
        let stats = unsafe { stats.assume_init() };
        #[allow(clippy::unnecessary_cast)]
        let bytes = (stats.f_bavail as u64).saturating_mul(stats.f_frsize as u64);
        Ok(bytes / BYTES_PER_MB)
    }

    #[cfg(not(unix))]
    fn free_mb(&self, _path: &Path) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "free space probing requires statvfs",
        ))
    }
}

/// Fixed answers keyed by path, with a fallback for everything else.
#[derive(Debug, Clone, Default)]
pub struct FixedFreeSpace {
    pub default_mb: u64,
    pub per_path: BTreeMap<PathBuf, u64>,
}

impl FixedFreeSpace {
    pub fn new(default_mb: u64) -> Self {
        Self {
            default_mb,
            per_path: BTreeMap::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>, free_mb: u64) -> Self {
        self.per_path.insert(path.into(), free_mb);
        self
    }
}

impl FreeSpaceProbe for FixedFreeSpace {
    fn free_mb(&self, path: &Path) -> std::io::Result<u64> {
        Ok(self.per_path.get(path).copied().unwrap_or(self.default_mb))
    }
}

/// The path itself when it exists, else its closest existing parent.
pub fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|candidate| !candidate.as_os_str().is_empty() && candidate.exists())
        .map(Path::to_path_buf)
}

/// Passes when free space is at least the minimum.
pub fn check_requirement(
    probe: &dyn FreeSpaceProbe,
    requirement: &DiskRequirement,
) -> Result<u64, PreflightFailure> {
    let failure = |message: String| PreflightFailure {
        role: requirement.role,
        path: requirement.path.clone(),
        message,
    };
    let probed = nearest_existing_ancestor(&requirement.path).ok_or_else(|| {
        failure(format!(
            "{} {} has no existing ancestor",
            requirement.role.as_str(),
            requirement.path.display()
        ))
    })?;
    let free_mb = probe.free_mb(&probed).map_err(|err| {
        failure(format!(
            "could not read free space of {} {}: {err}",
            requirement.role.as_str(),
            probed.display()
        ))
    })?;
    if free_mb < requirement.min_free_mb {
        return Err(failure(format!(
            "{} {} has {free_mb} MB free; {} MB required",
            requirement.role.as_str(),
            requirement.path.display(),
            requirement.min_free_mb
        )));
    }
    Ok(free_mb)
}
