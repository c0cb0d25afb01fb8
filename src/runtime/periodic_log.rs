use super::{atomic_write_file, RuntimeError, StatePaths};
use crate::config::RecoverySettings;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Destination for log entries operators watch centrally (the queue database).
pub trait CentralLog {
    fn post_log(&mut self, level: &str, message: &str, posted_at: i64) -> Result<(), String>;
}

/// Message classes carry their own repeat interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    CrashFlag,
    Disabled,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicIntervals {
    pub crash_flag_secs: i64,
    pub disabled_secs: i64,
    pub general_secs: i64,
}

impl PeriodicIntervals {
    pub fn from_settings(recovery: &RecoverySettings) -> Self {
        Self {
            crash_flag_secs: hours(recovery.crash_flag_log_interval_hours),
            disabled_secs: hours(recovery.disabled_log_interval_hours),
            general_secs: hours(recovery.general_log_interval_hours),
        }
    }

    pub fn for_class(&self, class: MessageClass) -> i64 {
        match class {
            MessageClass::CrashFlag => self.crash_flag_secs,
            MessageClass::Disabled => self.disabled_secs,
            MessageClass::General => self.general_secs,
        }
    }
}

impl Default for PeriodicIntervals {
    fn default() -> Self {
        Self::from_settings(&RecoverySettings::default())
    }
}

fn hours(value: u64) -> i64 {
    i64::try_from(value.saturating_mul(3600)).unwrap_or(i64::MAX)
}

/// Cache entries older than this are dropped on save.
const RETENTION_SECS: i64 = 14 * 24 * 3600;

/// Suppresses repeats of the same message to the central log within an interval.
///
/// The message → last-posted cache is persisted as tab-separated `<unix-seconds>\t<message>`
/// rows so suppression survives restarts; a persistently broken condition posts once per
/// interval instead of once per process invocation.
#[derive(Debug)]
pub struct PeriodicLogger {
    path: PathBuf,
    intervals: PeriodicIntervals,
    last_posted: BTreeMap<String, i64>,
}

impl PeriodicLogger {
    pub fn load(paths: &StatePaths, intervals: PeriodicIntervals) -> Self {
        let path = paths.periodic_messages_path();
        let last_posted = fs::read_to_string(&path)
            .map(|raw| parse_cache(&raw))
            .unwrap_or_default();
        Self {
            path,
            intervals,
            last_posted,
        }
    }

    pub fn set_intervals(&mut self, intervals: PeriodicIntervals) {
        self.intervals = intervals;
    }

    pub fn last_posted(&self, message: &str) -> Option<i64> {
        self.last_posted.get(&normalize_message(message)).copied()
    }

    /// Posts `message` unless the same text was posted less than the class interval ago.
    /// Returns whether it was posted. Suppressed messages still go to tracing at debug.
    pub fn log(
        &mut self,
        central: &mut dyn CentralLog,
        class: MessageClass,
        level: &str,
        message: &str,
        now: i64,
    ) -> Result<bool, RuntimeError> {
        let key = normalize_message(message);
        let interval = self.intervals.for_class(class);
        if let Some(last) = self.last_posted.get(&key) {
            if now.saturating_sub(*last) < interval {
                tracing::debug!(last_posted = *last, "suppressing repeated message: {key}");
                return Ok(false);
            }
        }

        match level {
            "error" => tracing::error!("{key}"),
            "warn" => tracing::warn!("{key}"),
            _ => tracing::info!("{key}"),
        }
        if let Err(err) = central.post_log(level, &key, now) {
            tracing::warn!("failed to post message to central log: {err}");
            return Ok(false);
        }

        self.last_posted.insert(key, now);
        self.save(now)?;
        Ok(true)
    }

    fn save(&mut self, now: i64) -> Result<(), RuntimeError> {
        self.last_posted
            .retain(|_, posted| now.saturating_sub(*posted) < RETENTION_SECS);
        let mut body = String::new();
        for (message, posted) in &self.last_posted {
            body.push_str(&format!("{posted}\t{message}\n"));
        }
        atomic_write_file(&self.path, body.as_bytes()).map_err(|source| {
            RuntimeError::WriteState {
                path: self.path.display().to_string(),
                source,
            }
        })
    }
}

fn normalize_message(message: &str) -> String {
    message
        .trim()
        .chars()
        .map(|ch| if ch == '\t' || ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect()
}

fn parse_cache(raw: &str) -> BTreeMap<String, i64> {
    let mut cache = BTreeMap::new();
    for line in raw.lines() {
        let Some((posted, message)) = line.split_once('\t') else {
            continue;
        };
        let Ok(posted) = posted.trim().parse::<i64>() else {
            continue;
        };
        let message = message.trim();
        if message.is_empty() {
            continue;
        }
        let entry = cache.entry(message.to_string()).or_insert(posted);
        if posted > *entry {
            *entry = posted;
        }
    }
    cache
}
