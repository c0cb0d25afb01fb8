/// Why the dispatch loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    IterationLimit,
    NoTaskFound,
    Disabled,
    UpdateRequired,
    AbortRequested,
    SettingsUnavailable,
    CrashFlagPresent,
    ExcessiveFailures,
    ExcessiveDeadlocks,
    WorkDirProblem,
    DiskSpace,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IterationLimit => "iteration_limit",
            Self::NoTaskFound => "no_task_found",
            Self::Disabled => "disabled",
            Self::UpdateRequired => "update_required",
            Self::AbortRequested => "abort_requested",
            Self::SettingsUnavailable => "settings_unavailable",
            Self::CrashFlagPresent => "crash_flag_present",
            Self::ExcessiveFailures => "excessive_failures",
            Self::ExcessiveDeadlocks => "excessive_deadlocks",
            Self::WorkDirProblem => "work_dir_problem",
            Self::DiskSpace => "disk_space",
        }
    }

    /// Process exit status. Zero covers every orderly stop.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::IterationLimit | Self::NoTaskFound | Self::Disabled | Self::AbortRequested => 0,
            Self::UpdateRequired => 3,
            Self::SettingsUnavailable => 4,
            Self::CrashFlagPresent => 5,
            Self::ExcessiveFailures => 6,
            Self::ExcessiveDeadlocks => 7,
            Self::WorkDirProblem => 8,
            Self::DiskSpace => 9,
        }
    }

    pub fn is_error(self) -> bool {
        self.exit_code() != 0
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
