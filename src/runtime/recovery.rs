use super::RuntimeError;
use std::fs;
use std::path::{Path, PathBuf};

/// Removes every entry under `dir`, leaving the directory itself in place.
/// A missing directory is created. Returns how many top-level entries were removed.
pub fn clean_working_directory(dir: &Path) -> Result<usize, RuntimeError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|source| RuntimeError::CreateDir {
            path: dir.display().to_string(),
            source,
        })?;
        return Ok(0);
    }

    let mut entries = list_entries(dir)?;
    entries.sort();

    let mut removed = 0;
    for path in entries {
        let result = if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(RuntimeError::RemoveState {
                    path: path.display().to_string(),
                    source,
                })
            }
        }
    }
    Ok(removed)
}

pub(crate) fn list_entries(dir: &Path) -> Result<Vec<PathBuf>, RuntimeError> {
    let read_err = |source| RuntimeError::ReadState {
        path: dir.display().to_string(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        entries.push(entry.map_err(read_err)?.path());
    }
    Ok(entries)
}
