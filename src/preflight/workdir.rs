use crate::task::PARAMETER_FILE_PREFIX;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WorkDirError {
    #[error("failed to create working directory {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read working directory {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove stray parameter file {path}: {source}")]
    Remove {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("working directory {path} is not empty: {}", entries.join(", "))]
    NotEmpty { path: String, entries: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkDirCheck {
    Empty,
    Created,
    /// A lone `JobParameters_*.json` left by an interrupted run was deleted.
    RemovedStrayParameterFile(PathBuf),
}

/// Verifies the working directory holds nothing from a previous step.
pub fn ensure_working_dir_empty(dir: &Path) -> Result<WorkDirCheck, WorkDirError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|source| WorkDirError::Create {
            path: dir.display().to_string(),
            source,
        })?;
        return Ok(WorkDirCheck::Created);
    }

    let read_err = |source| WorkDirError::Read {
        path: dir.display().to_string(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        entries.push(entry.map_err(read_err)?.path());
    }
    entries.sort();

    match entries.as_slice() {
        [] => Ok(WorkDirCheck::Empty),
        [only] if is_parameter_file(only) => {
            fs::remove_file(only).map_err(|source| WorkDirError::Remove {
                path: only.display().to_string(),
                source,
            })?;
            Ok(WorkDirCheck::RemovedStrayParameterFile(only.clone()))
        }
        _ => Err(WorkDirError::NotEmpty {
            path: dir.display().to_string(),
            entries: entries
                .iter()
                .filter_map(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .collect(),
        }),
    }
}

fn is_parameter_file(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    lower.starts_with(&PARAMETER_FILE_PREFIX.to_ascii_lowercase()) && lower.ends_with(".json")
}
