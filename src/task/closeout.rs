use serde::{Deserialize, Serialize};

/// Terminal (and not-quite-terminal) result codes a claimed step is closed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseoutCode {
    Success,
    NoData,
    NoUsableInputFiles,
    NoOutputFiles,
    FileNotFound,
    Failed,
    FailedRemote,
    ResetJobStep,
    ResetJobStepInsufficientMemory,
    RunningRemote,
    SkippedWaitingOnInput,
    SkippedAlreadyComplete,
    SkippedNotRequired,
}

/// Where the queue row goes once a step is closed with a given code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDisposition {
    Complete,
    Failed,
    Requeue,
    RunningRemote,
}

impl QueueDisposition {
    pub fn as_state(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Requeue => "pending",
            Self::RunningRemote => "running_remote",
        }
    }
}

impl CloseoutCode {
    pub const ALL: [CloseoutCode; 13] = [
        Self::Success,
        Self::NoData,
        Self::NoUsableInputFiles,
        Self::NoOutputFiles,
        Self::FileNotFound,
        Self::Failed,
        Self::FailedRemote,
        Self::ResetJobStep,
        Self::ResetJobStepInsufficientMemory,
        Self::RunningRemote,
        Self::SkippedWaitingOnInput,
        Self::SkippedAlreadyComplete,
        Self::SkippedNotRequired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoData => "no_data",
            Self::NoUsableInputFiles => "no_usable_input_files",
            Self::NoOutputFiles => "no_output_files",
            Self::FileNotFound => "file_not_found",
            Self::Failed => "failed",
            Self::FailedRemote => "failed_remote",
            Self::ResetJobStep => "reset_job_step",
            Self::ResetJobStepInsufficientMemory => "reset_job_step_insufficient_memory",
            Self::RunningRemote => "running_remote",
            Self::SkippedWaitingOnInput => "skipped_waiting_on_input",
            Self::SkippedAlreadyComplete => "skipped_already_complete",
            Self::SkippedNotRequired => "skipped_not_required",
        }
    }

    /// Accepts snake_case, CamelCase and dashed or spaced spellings of a code.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let wanted = squash(raw);
        Self::ALL
            .into_iter()
            .find(|code| squash(code.as_str()) == wanted)
            .ok_or_else(|| format!("unknown result code `{}`", raw.trim()))
    }

    pub fn is_skipped(self) -> bool {
        matches!(
            self,
            Self::SkippedWaitingOnInput | Self::SkippedAlreadyComplete | Self::SkippedNotRequired
        )
    }

    /// Codes the queue treats as a finished, non-failed step.
    pub fn is_success_like(self) -> bool {
        matches!(self, Self::Success) || self.is_skipped()
    }

    /// The step ran correctly but found nothing to do.
    pub fn is_no_data(self) -> bool {
        matches!(self, Self::NoData | Self::NoUsableInputFiles)
    }

    pub fn is_reset(self) -> bool {
        matches!(self, Self::ResetJobStep | Self::ResetJobStepInsufficientMemory)
    }

    /// Whether closing with this code bumps the consecutive critical-failure counter.
    pub fn counts_as_critical_failure(self) -> bool {
        !(self.is_success_like()
            || self.is_no_data()
            || self.is_reset()
            || self == Self::RunningRemote)
    }

    pub fn disposition(self) -> QueueDisposition {
        if self == Self::RunningRemote {
            QueueDisposition::RunningRemote
        } else if self.is_reset() {
            QueueDisposition::Requeue
        } else if self.is_success_like() || self.is_no_data() {
            QueueDisposition::Complete
        } else {
            QueueDisposition::Failed
        }
    }
}

fn squash(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !matches!(ch, '_' | '-' | ' '))
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

impl std::fmt::Display for CloseoutCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
