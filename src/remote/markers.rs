use super::{RemoteDescriptor, RemoteError};
use crate::shared::time::{format_rfc3339, parse_timestamp};
use crate::task::{CloseoutCode, ParamStore, Task};
use serde::{Deserialize, Serialize};

/// Parsed `.success` / `.fail` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMarker {
    pub result_code: CloseoutCode,
    pub message: String,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub result_files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawMarker {
    #[serde(alias = "resultCode", alias = "code")]
    result_code: Option<String>,
    #[serde(default, alias = "completionMessage")]
    message: String,
    #[serde(default, alias = "startTime", alias = "started_at")]
    started: Option<serde_json::Value>,
    #[serde(default, alias = "finishTime", alias = "finished_at")]
    finished: Option<serde_json::Value>,
    #[serde(default, alias = "resultFiles")]
    result_files: Vec<String>,
}

fn timestamp_value(value: Option<serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(number) => number.as_i64(),
        serde_json::Value::String(raw) => parse_timestamp(&raw),
        _ => None,
    }
}

/// Parses a marker. A marker without a recognizable result code is rejected; the caller
/// decides what an unusable marker means.
pub fn parse_marker(path: &str, raw: &[u8]) -> Result<RemoteMarker, RemoteError> {
    let marker_err = |reason: String| RemoteError::Marker {
        path: path.to_string(),
        reason,
    };
    let parsed: RawMarker =
        serde_json::from_slice(raw).map_err(|err| marker_err(err.to_string()))?;
    let code = parsed
        .result_code
        .ok_or_else(|| marker_err("missing result_code".to_string()))?;
    let result_code = CloseoutCode::parse(&code).map_err(marker_err)?;
    Ok(RemoteMarker {
        result_code,
        message: parsed.message.trim().to_string(),
        started_at: timestamp_value(parsed.started),
        finished_at: timestamp_value(parsed.finished),
        result_files: parsed
            .result_files
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
    })
}

/// Contents of `<stem>_status.json`, written by the remote worker while it runs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteProgress {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RemoteProgress {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        serde_json::from_slice(raw).ok()
    }

    /// The worker claims to be done successfully.
    pub fn reports_success(&self) -> bool {
        self.state
            .as_deref()
            .map(|state| {
                let state = state.trim();
                state.eq_ignore_ascii_case("success") || state.eq_ignore_ascii_case("complete")
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfoFile {
    pub job: i64,
    pub step: i64,
    pub tool: String,
    pub dataset: String,
    pub manager: String,
    pub work_dir: String,
    pub staged_at: String,
    pub input_files: Vec<String>,
    pub params: ParamStore,
    pub success_file: String,
    pub fail_file: String,
    pub lock_file: String,
    pub status_file: String,
}

impl InfoFile {
    pub fn for_task(
        task: &Task,
        descriptor: &RemoteDescriptor,
        manager: &str,
        input_files: Vec<String>,
    ) -> Self {
        Self {
            job: task.job,
            step: task.step,
            tool: task.tool.clone(),
            dataset: task.dataset.clone(),
            manager: manager.to_string(),
            work_dir: descriptor.work_dir.clone(),
            staged_at: format_rfc3339(descriptor.staged_at),
            input_files,
            params: task.params.clone(),
            success_file: descriptor.success_file.clone(),
            fail_file: descriptor.fail_file.clone(),
            lock_file: descriptor.lock_file.clone(),
            status_file: descriptor.status_file.clone(),
        }
    }

    pub fn render(&self) -> Result<Vec<u8>, RemoteError> {
        serde_json::to_vec_pretty(self).map_err(|err| RemoteError::Marker {
            path: format!("tasks/{}_{}.info", self.job, self.step),
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_marker_with_rfc3339_and_unix_times() {
        let marker = parse_marker(
            "tasks/Job1_Step1.success",
            br#"{"result_code":"success","message":" done ","started":"2026-01-02T03:04:05Z",
                "finished":1767323100,"result_files":["out.txt"," "]}"#,
        )
        .expect("parse");
        assert_eq!(marker.result_code, CloseoutCode::Success);
        assert_eq!(marker.message, "done");
        assert_eq!(marker.started_at, Some(1_767_323_045));
        assert_eq!(marker.finished_at, Some(1_767_323_100));
        assert_eq!(marker.result_files, vec!["out.txt".to_string()]);
    }

    #[test]
    fn marker_without_code_or_with_garbage_is_rejected() {
        assert!(parse_marker("m", br#"{"message":"no code"}"#).is_err());
        assert!(parse_marker("m", br#"{"result_code":"exploded"}"#).is_err());
        assert!(parse_marker("m", b"not json").is_err());
    }

    #[test]
    fn progress_reports_success_states() {
        let progress = RemoteProgress::parse(br#"{"state":"Complete","progress":100}"#)
            .expect("progress");
        assert!(progress.reports_success());
        assert!(!RemoteProgress::default().reports_success());
    }
}
