use crate::config::{CleanupMode, Settings};
use crate::task::CloseoutCode;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The loop stops once more than this many steps failed in a row.
pub const MAX_CRITICAL_FAILURES: u32 = 10;
/// The loop stops on this many consecutive deadlocked claims.
pub const MAX_CONSECUTIVE_DEADLOCKS: u32 = 3;

pub const PARAM_ACTIVE: &str = "mgr_active";
pub const PARAM_UPDATE_REQUIRED: &str = "mgr_update_required";
pub const PARAM_CLEANUP_MODE: &str = "cleanup_mode";
pub const PARAM_DEBUG_LEVEL: &str = "debug_level";

/// Process-wide manager flags and counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerState {
    pub active_local: bool,
    pub active_remote: bool,
    pub update_required: bool,
    pub cleanup_mode: CleanupMode,
    pub debug_level: u8,
    pub working_dir: PathBuf,
    pub critical_failures: u32,
    pub deadlocks: u32,
    pub last_refresh_at: Option<i64>,
}

impl ManagerState {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            active_local: settings.manager.active_local,
            active_remote: true,
            update_required: false,
            cleanup_mode: settings.recovery.cleanup_mode,
            debug_level: settings.manager.debug_level,
            working_dir: settings.manager.working_dir.clone(),
            critical_failures: 0,
            deadlocks: 0,
            last_refresh_at: None,
        }
    }

    /// Picks up values from a reloaded settings file. Counters survive.
    pub fn apply_local_settings(&mut self, settings: &Settings) {
        self.active_local = settings.manager.active_local;
        self.cleanup_mode = settings.recovery.cleanup_mode;
        self.debug_level = settings.manager.debug_level;
        self.working_dir = settings.manager.working_dir.clone();
    }

    /// Applies control-store params. Unknown names are ignored; unparseable values keep
    /// the current setting and are reported back.
    pub fn apply_remote_params(
        &mut self,
        params: &BTreeMap<String, String>,
        now: i64,
    ) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, value) in params {
            let value = value.trim();
            match name.as_str() {
                PARAM_ACTIVE => match parse_flag(value) {
                    Some(flag) => self.active_remote = flag,
                    None => problems.push(format!("{PARAM_ACTIVE}: `{value}` is not a boolean")),
                },
                PARAM_UPDATE_REQUIRED => match parse_flag(value) {
                    Some(flag) => self.update_required = flag,
                    None => problems.push(format!(
                        "{PARAM_UPDATE_REQUIRED}: `{value}` is not a boolean"
                    )),
                },
                PARAM_CLEANUP_MODE => match CleanupMode::parse(value) {
                    Ok(mode) => self.cleanup_mode = mode,
                    Err(err) => problems.push(format!("{PARAM_CLEANUP_MODE}: {err}")),
                },
                PARAM_DEBUG_LEVEL => match value.parse::<u8>() {
                    Ok(level) => self.debug_level = level,
                    Err(_) => {
                        problems.push(format!("{PARAM_DEBUG_LEVEL}: `{value}` is not a level"))
                    }
                },
                _ => {}
            }
        }
        self.last_refresh_at = Some(now);
        problems
    }

    pub fn refresh_due(&self, now: i64, interval_secs: u64) -> bool {
        match self.last_refresh_at {
            None => true,
            Some(last) => {
                now.saturating_sub(last) >= i64::try_from(interval_secs).unwrap_or(i64::MAX)
            }
        }
    }

    pub fn record_closeout(&mut self, code: CloseoutCode) {
        if code == CloseoutCode::Success {
            self.critical_failures = 0;
        } else if code.counts_as_critical_failure() {
            self.critical_failures = self.critical_failures.saturating_add(1);
        }
    }

    pub fn record_no_task(&mut self) {
        self.critical_failures = 0;
        self.deadlocks = 0;
    }

    pub fn record_result_error(&mut self) {
        self.critical_failures = self.critical_failures.saturating_add(1);
    }

    /// Returns true when the deadlock limit has been reached.
    pub fn record_deadlock(&mut self) -> bool {
        self.deadlocks = self.deadlocks.saturating_add(1);
        self.deadlocks >= MAX_CONSECUTIVE_DEADLOCKS
    }

    pub fn record_task_found(&mut self) {
        self.deadlocks = 0;
    }

    pub fn excessive_failures(&self) -> bool {
        self.critical_failures > MAX_CRITICAL_FAILURES
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}
