use super::{atomic_write_json, remove_if_exists, RuntimeError, StatePaths};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Written when the agent turns itself off, e.g. the working directory ran out of space.
/// Only an operator removing the file re-enables the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDisable {
    pub reason: String,
    pub disabled_at: i64,
}

/// A temporary hold on task claiming that lifts itself once `until` passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRecord {
    pub until: i64,
    pub reason: String,
    pub paused_at: i64,
}

pub fn disable_locally(paths: &StatePaths, reason: &str, now: i64) -> Result<(), RuntimeError> {
    let path = paths.disabled_local_path();
    let record = LocalDisable {
        reason: reason.to_string(),
        disabled_at: now,
    };
    atomic_write_json(&path, &record).map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })
}

pub fn local_disable(paths: &StatePaths) -> Result<Option<LocalDisable>, RuntimeError> {
    let path = paths.disabled_local_path();
    if !path.exists() {
        return Ok(None);
    }
    match read_json::<LocalDisable>(&path)? {
        Some(record) => Ok(Some(record)),
        None => Ok(Some(LocalDisable {
            reason: "local disable marker present".to_string(),
            disabled_at: 0,
        })),
    }
}

/// Extends the pause to `until`; an existing later pause wins.
pub fn pause_until(
    paths: &StatePaths,
    until: i64,
    reason: &str,
    now: i64,
) -> Result<PauseRecord, RuntimeError> {
    if let Some(existing) = active_pause(paths, now)? {
        if existing.until >= until {
            return Ok(existing);
        }
    }
    let path = paths.paused_until_path();
    let record = PauseRecord {
        until,
        reason: reason.to_string(),
        paused_at: now,
    };
    atomic_write_json(&path, &record).map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })?;
    Ok(record)
}

/// Returns the pause still in force at `now`. Expired pauses are removed.
pub fn active_pause(paths: &StatePaths, now: i64) -> Result<Option<PauseRecord>, RuntimeError> {
    let path = paths.paused_until_path();
    if !path.exists() {
        return Ok(None);
    }
    let record = read_json::<PauseRecord>(&path)?;
    match record {
        Some(record) if record.until > now => Ok(Some(record)),
        _ => {
            remove_if_exists(&path).map_err(|source| RuntimeError::RemoveState {
                path: path.display().to_string(),
                source,
            })?;
            Ok(None)
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, RuntimeError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(RuntimeError::ReadState {
                path: path.display().to_string(),
                source,
            })
        }
    };
    Ok(serde_json::from_str(&raw).ok())
}
