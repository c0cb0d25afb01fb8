pub mod lifecycle;
pub mod schema;
pub mod sqlite;

pub use sqlite::{LogEntry, NewStep, SqliteTaskQueue, StepRow};

use crate::runtime::CentralLog;
use crate::task::{CloseoutCode, Task};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create queue database parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("invalid {what} stored for job {job} step {step}: {source}")]
    Parse {
        what: &'static str,
        job: i64,
        step: i64,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {what} for job {job} step {step}: {source}")]
    Encode {
        what: &'static str,
        job: i64,
        step: i64,
        #[source]
        source: serde_json::Error,
    },
    #[error("job {job} step {step} is not claimed by manager `{manager}`")]
    NotClaimed { job: i64, step: i64, manager: String },
    #[error("job {job} step {step} already exists in the queue")]
    Duplicate { job: i64, step: i64 },
}

impl QueueError {
    /// Lock contention reported by SQLite. Callers treat this as a deadlock and retry.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Open { source, .. } | Self::Sql { source } => is_busy_error(source),
            _ => false,
        }
    }
}

pub(crate) fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Tools this manager accepts. Empty accepts every tool.
    pub step_tools: Vec<String>,
}

#[derive(Debug)]
pub enum ClaimOutcome {
    TaskFound(Box<Task>),
    NoTaskFound,
    Deadlock(String),
    ResultError(String),
}

/// How a claimed step leaves this agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskClose {
    pub code: CloseoutCode,
    pub message: String,
    /// Earliest time the row may be claimed again. Only used for requeue and
    /// running-remote dispositions.
    pub next_attempt_at: i64,
}

impl TaskClose {
    pub fn new(code: CloseoutCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            next_attempt_at: 0,
        }
    }

    pub fn retry_at(mut self, next_attempt_at: i64) -> Self {
        self.next_attempt_at = next_attempt_at;
        self
    }
}

/// The shared work queue as seen by one manager.
pub trait TaskQueue {
    fn claim(&mut self, request: &ClaimRequest, now: i64) -> ClaimOutcome;

    /// Persists the step's final (or parking) state. Must be called exactly once per claim.
    fn close(&mut self, task: &Task, close: &TaskClose, now: i64) -> Result<(), QueueError>;

    /// Returns rows left `running` by a crashed process of this manager to the queue.
    fn recover_orphaned_claims(&mut self) -> Result<usize, QueueError>;
}

/// Per-manager parameters edited centrally by operators (`mgr_active`, `cleanup_mode`, ...).
pub trait ControlStore {
    fn load_manager_params(&mut self) -> Result<BTreeMap<String, String>, QueueError>;

    fn set_manager_param(&mut self, name: &str, value: &str, now: i64) -> Result<(), QueueError>;
}

/// Everything the dispatch loop needs from central storage.
pub trait AgentBackend: TaskQueue + ControlStore + CentralLog {}

impl<T: TaskQueue + ControlStore + CentralLog> AgentBackend for T {}
