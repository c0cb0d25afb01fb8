use super::{atomic_write_json, now_secs, StatePaths};
use crate::plugins::{EventSink, PluginEvent};
use crate::shared::time::format_rfc3339;
use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerStatus {
    #[default]
    Starting,
    Running,
    Idle,
    Stopped,
    Disabled,
    Paused,
    FlagFileExists,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NoTask,
    Running,
    RunningRemote,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub manager_name: String,
    pub manager_status: ManagerStatus,
    pub task_status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    pub progress: f32,
    #[serde(default)]
    pub most_recent_message: String,
    #[serde(default)]
    pub most_recent_error: String,
    pub pid: u32,
    pub updated_at: String,
}

/// `status.json` writer. Every mutation flushes; write failures are logged and dropped so
/// status reporting never interrupts a task.
#[derive(Debug)]
pub struct StatusFile {
    path: PathBuf,
    status: AgentStatus,
}

impl StatusFile {
    pub fn new(paths: &StatePaths, manager_name: &str) -> Self {
        Self {
            path: paths.status_file_path(),
            status: AgentStatus {
                manager_name: manager_name.to_string(),
                pid: std::process::id(),
                ..AgentStatus::default()
            },
        }
    }

    pub fn read(paths: &StatePaths) -> Option<AgentStatus> {
        let raw = fs::read_to_string(paths.status_file_path()).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn status(&self) -> &AgentStatus {
        &self.status
    }

    pub fn set_manager(&mut self, status: ManagerStatus, message: &str) {
        self.status.manager_status = status;
        if !message.is_empty() {
            self.status.most_recent_message = message.to_string();
        }
        self.flush();
    }

    pub fn begin_task(&mut self, task: &Task) {
        self.status.manager_status = ManagerStatus::Running;
        self.status.task_status = TaskStatus::Running;
        self.status.job = Some(task.job);
        self.status.step = Some(task.step);
        self.status.tool = Some(task.tool.clone());
        self.status.dataset = Some(task.dataset.clone());
        self.status.progress = 0.0;
        self.status.most_recent_error.clear();
        self.status.most_recent_message = format!("started {}", task.job_step_stem());
        self.flush();
    }

    pub fn progress(&mut self, percent: f32) {
        self.status.progress = percent.clamp(0.0, 100.0);
        self.flush();
    }

    pub fn message(&mut self, message: &str) {
        self.status.most_recent_message = message.to_string();
        self.flush();
    }

    pub fn error(&mut self, message: &str) {
        self.status.most_recent_error = message.to_string();
        self.flush();
    }

    pub fn end_task(&mut self, outcome: TaskStatus) {
        self.status.task_status = outcome;
        self.status.manager_status = ManagerStatus::Idle;
        if outcome == TaskStatus::Completed {
            self.status.progress = 100.0;
        }
        self.flush();
    }

    fn flush(&mut self) {
        self.status.updated_at = format_rfc3339(now_secs());
        if let Err(err) = atomic_write_json(&self.path, &self.status) {
            tracing::warn!(path = %self.path.display(), "failed to write status file: {err}");
        }
    }
}

/// Routes plugin events to tracing and the status file.
pub struct StatusEventSink<'a> {
    status: &'a mut StatusFile,
}

impl<'a> StatusEventSink<'a> {
    pub fn new(status: &'a mut StatusFile) -> Self {
        Self { status }
    }
}

impl EventSink for StatusEventSink<'_> {
    fn emit(&mut self, event: PluginEvent) {
        match event {
            PluginEvent::Debug(message) => tracing::debug!("{message}"),
            PluginEvent::Status(message) => {
                tracing::info!("{message}");
                self.status.message(&message);
            }
            PluginEvent::Warning(message) => {
                tracing::warn!("{message}");
                self.status.message(&message);
            }
            PluginEvent::Error(message) => {
                tracing::error!("{message}");
                self.status.error(&message);
            }
            PluginEvent::Progress { percent, detail } => {
                tracing::debug!(percent, "{detail}");
                self.status.progress(percent);
            }
        }
    }
}
