use serde::{Deserialize, Serialize};

/// Progress of a remotely executing step, as last observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    #[default]
    Unstarted,
    Running,
    Success,
    Failed,
}

impl RemoteState {
    fn rank(self) -> u8 {
        match self {
            Self::Unstarted => 0,
            Self::Running => 1,
            Self::Success | Self::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// What a single poll saw in the remote file drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteObservation {
    Unstarted,
    Running,
    /// No marker files at all. Treated as still running.
    Undefined,
    Success,
    Failed,
}

/// Everything needed to find a staged step again on a later poll. Persisted with the
/// queue row between iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub host: String,
    pub work_dir: String,
    pub stem: String,
    pub info_file: String,
    pub lock_file: String,
    pub status_file: String,
    pub success_file: String,
    pub fail_file: String,
    pub staged_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub state: RemoteState,
    #[serde(default)]
    pub undefined_polls: u32,
    #[serde(default)]
    pub last_polled_at: Option<i64>,
}

impl RemoteDescriptor {
    pub fn new(host: &str, stem: &str, staged_at: i64) -> Self {
        Self {
            host: host.to_string(),
            work_dir: format!("work/{stem}"),
            stem: stem.to_string(),
            info_file: format!("tasks/{stem}.info"),
            lock_file: format!("tasks/{stem}.lock"),
            status_file: format!("work/{stem}/{stem}_status.json"),
            success_file: format!("tasks/{stem}.success"),
            fail_file: format!("tasks/{stem}.fail"),
            staged_at,
            started_at: None,
            finished_at: None,
            state: RemoteState::Unstarted,
            undefined_polls: 0,
            last_polled_at: None,
        }
    }

    /// File names inside the remote work dir that belong to the agent, not the results.
    pub fn bookkeeping_file_names(&self) -> Vec<String> {
        [&self.lock_file, &self.status_file, &self.info_file]
            .iter()
            .filter_map(|path| path.rsplit('/').next())
            .map(str::to_string)
            .collect()
    }

    /// Folds one poll into the descriptor. The state only moves forward; once terminal
    /// it never changes. Returns the state after the observation.
    pub fn observe(&mut self, observation: RemoteObservation, now: i64) -> RemoteState {
        self.last_polled_at = Some(now);
        if observation == RemoteObservation::Undefined {
            self.undefined_polls = self.undefined_polls.saturating_add(1);
        } else {
            self.undefined_polls = 0;
        }
        let observed = match observation {
            RemoteObservation::Unstarted => RemoteState::Unstarted,
            RemoteObservation::Running | RemoteObservation::Undefined => RemoteState::Running,
            RemoteObservation::Success => RemoteState::Success,
            RemoteObservation::Failed => RemoteState::Failed,
        };

        if !self.state.is_terminal() && observed.rank() > self.state.rank() {
            self.state = observed;
        }
        if self.state == RemoteState::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if self.state.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(now);
        }
        self.state
    }
}
