use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// What the agent does about a status flag left behind by a crashed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CleanupMode {
    #[default]
    Disabled,
    CleanOnce,
    Always,
}

impl CleanupMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::CleanOnce => "clean_once",
            Self::Always => "always",
        }
    }

    /// Accepts the symbolic names as well as the numeric codes `0`, `1`, `2`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "0" | "disabled" | "none" => Ok(Self::Disabled),
            "1" | "clean_once" | "cleanonce" => Ok(Self::CleanOnce),
            "2" | "always" => Ok(Self::Always),
            other => Err(format!(
                "cleanup mode `{other}` must be one of: disabled, clean_once, always"
            )),
        }
    }
}

impl std::fmt::Display for CleanupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub manager: ManagerSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub disk: DiskSettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default)]
    pub remote: RemoteSettings,
    #[serde(default)]
    pub plugins: PluginSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManagerSettings {
    pub name: String,
    #[serde(default = "default_true")]
    pub active_local: bool,
    pub working_dir: PathBuf,
    pub transfer_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub org_db_dir: Option<PathBuf>,
    pub dataset_storage_dir: Option<PathBuf>,
    pub failed_results_dir: Option<PathBuf>,
    #[serde(default = "default_debug_level")]
    pub debug_level: u8,
    /// Step tools this manager may claim. Empty means any tool.
    #[serde(default)]
    pub step_tools: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueSettings {
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_settings_refresh_seconds")]
    pub settings_refresh_seconds: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            settings_refresh_seconds: default_settings_refresh_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiskSettings {
    #[serde(default = "default_working_dir_min_free_mb")]
    pub working_dir_min_free_mb: u64,
    #[serde(default = "default_org_db_min_free_mb")]
    pub org_db_min_free_mb: u64,
    #[serde(default = "default_large_dir_min_free_mb")]
    pub transfer_dir_min_free_mb: u64,
    #[serde(default = "default_large_dir_min_free_mb")]
    pub dataset_dir_min_free_mb: u64,
    #[serde(default = "default_large_dir_min_free_mb")]
    pub cache_dir_min_free_mb: u64,
    #[serde(default = "default_disk_pause_hours")]
    pub pause_hours: u64,
}

impl Default for DiskSettings {
    fn default() -> Self {
        Self {
            working_dir_min_free_mb: default_working_dir_min_free_mb(),
            org_db_min_free_mb: default_org_db_min_free_mb(),
            transfer_dir_min_free_mb: default_large_dir_min_free_mb(),
            dataset_dir_min_free_mb: default_large_dir_min_free_mb(),
            cache_dir_min_free_mb: default_large_dir_min_free_mb(),
            pause_hours: default_disk_pause_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecoverySettings {
    #[serde(default)]
    pub cleanup_mode: CleanupMode,
    #[serde(default = "default_memory_pause_minutes")]
    pub memory_pause_minutes: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_crash_flag_log_interval_hours")]
    pub crash_flag_log_interval_hours: u64,
    #[serde(default = "default_disabled_log_interval_hours")]
    pub disabled_log_interval_hours: u64,
    #[serde(default = "default_general_log_interval_hours")]
    pub general_log_interval_hours: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            cleanup_mode: CleanupMode::default(),
            memory_pause_minutes: default_memory_pause_minutes(),
            settle_delay_ms: default_settle_delay_ms(),
            crash_flag_log_interval_hours: default_crash_flag_log_interval_hours(),
            disabled_log_interval_hours: default_disabled_log_interval_hours(),
            general_log_interval_hours: default_general_log_interval_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteHost {
    /// Mount point of the remote host's drop directory.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub hosts: BTreeMap<String, RemoteHost>,
    pub default_host: Option<String>,
    pub runtime_files_dir: Option<PathBuf>,
    #[serde(default = "default_remote_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_stale_file_minutes")]
    pub stale_file_minutes: u64,
    #[serde(default = "default_max_undefined_polls")]
    pub max_undefined_polls: u32,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            hosts: BTreeMap::new(),
            default_host: None,
            runtime_files_dir: None,
            poll_interval_seconds: default_remote_poll_interval_seconds(),
            stale_file_minutes: default_stale_file_minutes(),
            max_undefined_polls: default_max_undefined_polls(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginSettings {
    pub manifest_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_debug_level() -> u8 {
    1
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_settings_refresh_seconds() -> u64 {
    120
}

fn default_working_dir_min_free_mb() -> u64 {
    750
}

fn default_org_db_min_free_mb() -> u64 {
    2048
}

fn default_large_dir_min_free_mb() -> u64 {
    10 * 1024
}

fn default_disk_pause_hours() -> u64 {
    6
}

fn default_memory_pause_minutes() -> u64 {
    60
}

fn default_settle_delay_ms() -> u64 {
    1500
}

fn default_crash_flag_log_interval_hours() -> u64 {
    4
}

fn default_disabled_log_interval_hours() -> u64 {
    12
}

fn default_general_log_interval_hours() -> u64 {
    4
}

fn default_remote_poll_interval_seconds() -> u64 {
    300
}

fn default_stale_file_minutes() -> u64 {
    240
}

fn default_max_undefined_polls() -> u32 {
    48
}

impl Settings {
    /// Settings with every optional section at its default.
    pub fn for_manager(name: &str, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            manager: ManagerSettings {
                name: name.to_string(),
                active_local: true,
                working_dir: working_dir.into(),
                transfer_dir: None,
                cache_dir: None,
                org_db_dir: None,
                dataset_storage_dir: None,
                failed_results_dir: None,
                debug_level: default_debug_level(),
                step_tools: Vec::new(),
            },
            queue: QueueSettings::default(),
            disk: DiskSettings::default(),
            recovery: RecoverySettings::default(),
            remote: RemoteSettings::default(),
            plugins: PluginSettings::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.manager.name.trim();
        if name.is_empty() {
            return Err(ConfigError::Settings(
                "`manager.name` must be non-empty".to_string(),
            ));
        }
        if name.contains(char::is_whitespace) {
            return Err(ConfigError::Settings(format!(
                "`manager.name` `{name}` must not contain whitespace"
            )));
        }
        if !self.manager.working_dir.is_absolute() {
            return Err(ConfigError::Settings(
                "`manager.working_dir` must be an absolute path".to_string(),
            ));
        }
        for (key, path) in [
            ("manager.transfer_dir", &self.manager.transfer_dir),
            ("manager.cache_dir", &self.manager.cache_dir),
            ("manager.org_db_dir", &self.manager.org_db_dir),
            ("manager.dataset_storage_dir", &self.manager.dataset_storage_dir),
            ("manager.failed_results_dir", &self.manager.failed_results_dir),
        ] {
            if let Some(path) = path {
                if !path.is_absolute() {
                    return Err(ConfigError::Settings(format!(
                        "`{key}` must be an absolute path"
                    )));
                }
            }
        }

        if self.queue.busy_timeout_ms == 0 {
            return Err(ConfigError::Settings(
                "`queue.busy_timeout_ms` must be > 0".to_string(),
            ));
        }
        if self.disk.pause_hours == 0 {
            return Err(ConfigError::Settings(
                "`disk.pause_hours` must be > 0".to_string(),
            ));
        }

        for (host, cfg) in &self.remote.hosts {
            if host.trim().is_empty() {
                return Err(ConfigError::Settings(
                    "`remote.hosts` keys must be non-empty".to_string(),
                ));
            }
            if !cfg.root.is_absolute() {
                return Err(ConfigError::Settings(format!(
                    "remote host `{host}` root must be an absolute path"
                )));
            }
        }
        if let Some(default_host) = &self.remote.default_host {
            if !self.remote.hosts.contains_key(default_host) {
                return Err(ConfigError::Settings(format!(
                    "`remote.default_host` references unknown host `{default_host}`"
                )));
            }
        }
        if self.remote.poll_interval_seconds == 0 {
            return Err(ConfigError::Settings(
                "`remote.poll_interval_seconds` must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn manager_name(&self) -> &str {
        self.manager.name.trim()
    }

    pub fn resolve_queue_database(&self, state_root: &Path) -> PathBuf {
        self.queue
            .database_path
            .clone()
            .unwrap_or_else(|| state_root.join(super::DEFAULT_QUEUE_DB_FILE_NAME))
    }

    pub fn resolve_manifest_path(&self, state_root: &Path) -> PathBuf {
        self.plugins
            .manifest_path
            .clone()
            .unwrap_or_else(|| state_root.join(super::DEFAULT_MANIFEST_FILE_NAME))
    }

    pub fn accepts_step_tool(&self, tool: &str) -> bool {
        self.manager.step_tools.is_empty()
            || self
                .manager
                .step_tools
                .iter()
                .any(|allowed| allowed.trim().eq_ignore_ascii_case(tool.trim()))
    }

    /// Picks `requested` when configured, otherwise `remote.default_host`.
    pub fn resolve_remote_host(&self, requested: Option<&str>) -> Option<(String, &RemoteHost)> {
        let name = requested
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| self.remote.default_host.clone())?;
        self.remote.hosts.get(&name).map(|host| (name, host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
manager:
  name: Pub-12
  working_dir: /tmp/stepagent/work
"#
    }

    #[test]
    fn defaults_fill_in_documented_thresholds() {
        let settings: Settings = serde_yaml::from_str(minimal_yaml()).expect("parse settings");
        assert!(settings.manager.active_local);
        assert_eq!(settings.manager.debug_level, 1);
        assert_eq!(settings.disk.working_dir_min_free_mb, 750);
        assert_eq!(settings.disk.org_db_min_free_mb, 2048);
        assert_eq!(settings.disk.transfer_dir_min_free_mb, 10240);
        assert_eq!(settings.disk.dataset_dir_min_free_mb, 10240);
        assert_eq!(settings.disk.pause_hours, 6);
        assert_eq!(settings.recovery.memory_pause_minutes, 60);
        assert_eq!(settings.recovery.cleanup_mode, CleanupMode::Disabled);
        assert_eq!(settings.queue.settings_refresh_seconds, 120);
        settings.validate().expect("valid settings");
    }

    #[test]
    fn relative_working_dir_is_rejected() {
        let settings: Settings = serde_yaml::from_str(
            r#"
manager:
  name: Pub-12
  working_dir: work
"#,
        )
        .expect("parse settings");
        let err = settings.validate().expect_err("relative path must fail");
        assert!(err.to_string().contains("manager.working_dir"));
    }

    #[test]
    fn unknown_default_remote_host_is_rejected() {
        let settings: Settings = serde_yaml::from_str(
            r#"
manager:
  name: Pub-12
  working_dir: /tmp/work
remote:
  default_host: missing
  hosts:
    cluster:
      root: /mnt/cluster
"#,
        )
        .expect("parse settings");
        let err = settings.validate().expect_err("unknown host must fail");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn cleanup_mode_accepts_numeric_codes() {
        assert_eq!(CleanupMode::parse("0"), Ok(CleanupMode::Disabled));
        assert_eq!(CleanupMode::parse("1"), Ok(CleanupMode::CleanOnce));
        assert_eq!(CleanupMode::parse(" Always "), Ok(CleanupMode::Always));
        assert!(CleanupMode::parse("sometimes").is_err());
    }

    #[test]
    fn step_tool_filter_is_case_insensitive_and_open_when_empty() {
        let mut settings: Settings = serde_yaml::from_str(minimal_yaml()).expect("parse");
        assert!(settings.accepts_step_tool("anything"));
        settings.manager.step_tools = vec!["Sync".to_string()];
        assert!(settings.accepts_step_tool("SYNC"));
        assert!(!settings.accepts_step_tool("Decon"));
    }
}
