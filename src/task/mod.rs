pub mod closeout;
pub mod params;

pub use closeout::{CloseoutCode, QueueDisposition};
pub use params::{ParamStore, SECTION_JOB, SECTION_STEP};

use crate::remote::RemoteDescriptor;
use std::collections::BTreeSet;

/// Step tool whose only job is moving finished results into dataset storage.
pub const RESULTS_TRANSFER_TOOL: &str = "Results_Transfer";

/// One claimed job step. A claim produces exactly one close.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub job: i64,
    pub step: i64,
    pub tool: String,
    pub dataset: String,
    pub params: ParamStore,
    pub result_code: Option<CloseoutCode>,
    pub completion_message: String,
    pub result_files_to_skip: BTreeSet<String>,
    pub remote: Option<RemoteDescriptor>,
}

impl Task {
    pub fn new(job: i64, step: i64, tool: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            job,
            step,
            tool: tool.into(),
            dataset: dataset.into(),
            params: ParamStore::default(),
            result_code: None,
            completion_message: String::new(),
            result_files_to_skip: BTreeSet::new(),
            remote: None,
        }
    }

    /// `Job<job>_Step<step>`, used for remote file names and log context.
    pub fn job_step_stem(&self) -> String {
        format!("Job{}_Step{}", self.job, self.step)
    }

    pub fn parameter_file_name(&self) -> String {
        format!("{PARAMETER_FILE_PREFIX}{}.json", self.job)
    }

    pub fn is_results_transfer(&self) -> bool {
        self.tool.eq_ignore_ascii_case(RESULTS_TRANSFER_TOOL)
    }

    pub fn requires_org_db(&self) -> bool {
        self.params
            .get_bool(SECTION_STEP, "OrgDbRequired")
            .unwrap_or(false)
    }

    pub fn runs_remotely(&self) -> bool {
        self.params
            .get_bool(SECTION_STEP, "RunJobRemotely")
            .unwrap_or(false)
    }

    pub fn skip_result_file(&mut self, name: impl Into<String>) {
        self.result_files_to_skip.insert(name.into());
    }

    pub fn skips_result_file(&self, name: &str) -> bool {
        self.result_files_to_skip
            .iter()
            .any(|skipped| skipped.eq_ignore_ascii_case(name))
    }

    /// Records the latest completion message, keeping the first error-ish one that was set.
    pub fn set_completion_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.completion_message.trim().is_empty() {
            self.completion_message = message;
        }
    }
}

pub const PARAMETER_FILE_PREFIX: &str = "JobParameters_";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_and_parameter_file_follow_job_numbers() {
        let task = Task::new(100, 3, "Sync", "QC_Shew_01");
        assert_eq!(task.job_step_stem(), "Job100_Step3");
        assert_eq!(task.parameter_file_name(), "JobParameters_100.json");
    }

    #[test]
    fn results_transfer_detection_ignores_case() {
        assert!(Task::new(1, 1, "results_transfer", "ds").is_results_transfer());
        assert!(!Task::new(1, 1, "Sync", "ds").is_results_transfer());
    }

    #[test]
    fn remote_and_org_db_flags_read_step_parameters() {
        let mut task = Task::new(1, 1, "Sync", "ds");
        assert!(!task.runs_remotely());
        task.params.set(SECTION_STEP, "RunJobRemotely", "True");
        task.params.set(SECTION_STEP, "OrgDbRequired", "yes");
        assert!(task.runs_remotely());
        assert!(task.requires_org_db());
    }

    #[test]
    fn first_completion_message_sticks() {
        let mut task = Task::new(1, 1, "Sync", "ds");
        task.set_completion_message("input missing");
        task.set_completion_message("later noise");
        assert_eq!(task.completion_message, "input missing");
    }
}
