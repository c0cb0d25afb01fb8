use super::descriptor::{RemoteDescriptor, RemoteObservation, RemoteState};
use super::markers::{parse_marker, InfoFile, RemoteMarker, RemoteProgress};
use super::runtime_sync::RuntimeSync;
use super::{RemoteError, RemoteTransfer};
use crate::config::RemoteSettings;
use crate::plugins::{PluginContext, ToolExecutor};
use crate::task::{CloseoutCode, Task};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleFile {
    pub path: String,
    pub age_secs: i64,
}

/// One look at the remote file drop.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatusReport {
    pub observation: RemoteObservation,
    pub marker: Option<RemoteMarker>,
    /// Why a terminal observation is a failure even though it may look like success.
    pub problem: Option<String>,
    pub progress: Option<RemoteProgress>,
    pub stale_files: Vec<StaleFile>,
}

impl RemoteStatusReport {
    fn new(observation: RemoteObservation) -> Self {
        Self {
            observation,
            marker: None,
            problem: None,
            progress: None,
            stale_files: Vec::new(),
        }
    }
}

/// What a poll decided for the claimed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePollResult {
    pub code: CloseoutCode,
    pub message: String,
    /// Set while the step keeps running remotely.
    pub next_poll_at: Option<i64>,
}

/// Copies the working directory to `<root>/work/<stem>/` and drops `<root>/tasks/<stem>.info`.
/// The info file is written last so the remote side never picks up a half-staged step.
pub fn stage_task(
    transfer: &dyn RemoteTransfer,
    sync: &mut RuntimeSync,
    runtime_files_dir: Option<&Path>,
    task: &mut Task,
    working_dir: &Path,
    manager: &str,
    now: i64,
) -> Result<RemoteDescriptor, RemoteError> {
    sync.sync(transfer, runtime_files_dir)?;

    let descriptor = RemoteDescriptor::new(transfer.host_name(), &task.job_step_stem(), now);
    remove_remote_files(transfer, &descriptor)?;

    let mut inputs = Vec::new();
    let io = |source| RemoteError::Io {
        path: working_dir.display().to_string(),
        source,
    };
    let mut paths = fs::read_dir(working_dir)
        .map_err(io)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io)?;
    paths.sort();
    for path in paths.into_iter().filter(|path| path.is_file()) {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        transfer.put_file(&path, &format!("{}/{}", descriptor.work_dir, name))?;
        inputs.push(name.to_string());
    }

    let info = InfoFile::for_task(task, &descriptor, manager, inputs).render()?;
    transfer.write_file(&descriptor.info_file, &info)?;
    task.remote = Some(descriptor.clone());
    Ok(descriptor)
}

pub fn query_status(
    transfer: &dyn RemoteTransfer,
    descriptor: &RemoteDescriptor,
    stale_after_secs: i64,
    now: i64,
) -> Result<RemoteStatusReport, RemoteError> {
    if let Some(raw) = transfer.read_file(&descriptor.success_file)? {
        return Ok(match parse_marker(&descriptor.success_file, &raw) {
            Ok(marker) => RemoteStatusReport {
                marker: Some(marker),
                ..RemoteStatusReport::new(RemoteObservation::Success)
            },
            Err(err) => RemoteStatusReport {
                problem: Some(format!("success marker is unusable: {err}")),
                ..RemoteStatusReport::new(RemoteObservation::Failed)
            },
        });
    }

    if let Some(raw) = transfer.read_file(&descriptor.fail_file)? {
        let mut report = RemoteStatusReport::new(RemoteObservation::Failed);
        match parse_marker(&descriptor.fail_file, &raw) {
            Ok(marker) => report.marker = Some(marker),
            Err(err) => report.problem = Some(format!("fail marker is unusable: {err}")),
        }
        return Ok(report);
    }

    let lock = transfer.stat(&descriptor.lock_file)?;
    let status = transfer.stat(&descriptor.status_file)?;
    if lock.is_some() || status.is_some() {
        let progress = match status {
            Some(_) => transfer
                .read_file(&descriptor.status_file)?
                .and_then(|raw| RemoteProgress::parse(&raw)),
            None => None,
        };
        if progress.as_ref().is_some_and(RemoteProgress::reports_success) {
            return Ok(RemoteStatusReport {
                problem: Some("remote reported success without a success marker".to_string()),
                ..RemoteStatusReport::new(RemoteObservation::Failed)
            });
        }

        let mut report = RemoteStatusReport::new(RemoteObservation::Running);
        report.progress = progress;
        for (path, info) in [(&descriptor.lock_file, lock), (&descriptor.status_file, status)] {
            let Some(info) = info else {
                continue;
            };
            let age_secs = now.saturating_sub(info.modified_at);
            if age_secs > stale_after_secs {
                report.stale_files.push(StaleFile {
                    path: path.clone(),
                    age_secs,
                });
            }
        }
        return Ok(report);
    }

    if transfer.stat(&descriptor.info_file)?.is_some() {
        return Ok(RemoteStatusReport::new(RemoteObservation::Unstarted));
    }
    Ok(RemoteStatusReport::new(RemoteObservation::Undefined))
}

/// Polls a remotely running step once and, when it finished, brings its results home.
pub fn poll_remote_task(
    task: &mut Task,
    executor: &mut dyn ToolExecutor,
    ctx: &mut PluginContext<'_>,
    settings: &RemoteSettings,
    now: i64,
) -> Result<RemotePollResult, RemoteError> {
    let stem = task.job_step_stem();
    let transfer = ctx
        .remote
        .ok_or_else(|| RemoteError::MissingDescriptor { stem: stem.clone() })?;
    let mut descriptor = task
        .remote
        .clone()
        .ok_or_else(|| RemoteError::MissingDescriptor { stem: stem.clone() })?;

    let stale_after =
        i64::try_from(settings.stale_file_minutes.saturating_mul(60)).unwrap_or(i64::MAX);
    let report = query_status(transfer, &descriptor, stale_after, now)?;
    for stale in &report.stale_files {
        ctx.events.warning(&format!(
            "StaleFile: {} on {} unchanged for {} minutes",
            stale.path,
            descriptor.host,
            stale.age_secs / 60
        ));
    }
    if let Some(percent) = report.progress.as_ref().and_then(|progress| progress.progress) {
        let detail = report
            .progress
            .as_ref()
            .and_then(|progress| progress.message.clone())
            .unwrap_or_default();
        ctx.events.progress(percent, &detail);
    }

    let state = descriptor.observe(report.observation, now);
    if let Some(marker) = &report.marker {
        descriptor.started_at = marker.started_at.or(descriptor.started_at);
        descriptor.finished_at = marker.finished_at.or(descriptor.finished_at);
    }
    task.remote = Some(descriptor.clone());

    let result = match state {
        RemoteState::Success => match report.marker {
            Some(marker) => finish_success(task, executor, ctx, marker),
            None => finish_failed(task, executor, ctx, None, report.problem),
        },
        RemoteState::Failed => finish_failed(task, executor, ctx, report.marker, report.problem),
        RemoteState::Unstarted | RemoteState::Running => {
            if descriptor.undefined_polls > settings.max_undefined_polls {
                let message = format!(
                    "remote status of {stem} undefined for {} consecutive polls",
                    descriptor.undefined_polls
                );
                ctx.events.error(&message);
                RemotePollResult {
                    code: CloseoutCode::FailedRemote,
                    message,
                    next_poll_at: None,
                }
            } else {
                return Ok(RemotePollResult {
                    code: CloseoutCode::RunningRemote,
                    message: format!("{stem} is {} on {}", state.as_str(), descriptor.host),
                    next_poll_at: Some(now.saturating_add(
                        i64::try_from(settings.poll_interval_seconds).unwrap_or(i64::MAX),
                    )),
                });
            }
        }
    };

    if let Err(err) = remove_remote_files(transfer, &descriptor) {
        ctx.events
            .warning(&format!("failed to remove remote files for {stem}: {err}"));
    }
    Ok(result)
}

fn finish_success(
    task: &mut Task,
    executor: &mut dyn ToolExecutor,
    ctx: &mut PluginContext<'_>,
    marker: RemoteMarker,
) -> RemotePollResult {
    let terminal = |code, message: String| RemotePollResult {
        code,
        message,
        next_poll_at: None,
    };
    if let Err(err) = executor.retrieve_remote_results(task, ctx, &marker.result_files) {
        ctx.events.error(&err.to_string());
        return terminal(
            CloseoutCode::FailedRemote,
            format!("failed to retrieve remote results: {err}"),
        );
    }
    let code = marker.result_code;
    if code != CloseoutCode::Success {
        if code.is_skipped() || code.is_no_data() {
            if let Err(err) = executor.copy_results_to_transfer_directory(task, ctx) {
                ctx.events.error(&err.to_string());
                return terminal(
                    CloseoutCode::Failed,
                    format!("failed to copy results to transfer directory: {err}"),
                );
            }
        } else if code.counts_as_critical_failure() {
            if let Err(err) = executor.copy_failed_results_to_archive_directory(task, ctx) {
                ctx.events.warning(&err.to_string());
            }
        }
        return terminal(code, marker.message);
    }

    let post = executor.post_process_remote_results(task, ctx);
    if post != CloseoutCode::Success {
        if let Err(err) = executor.copy_failed_results_to_archive_directory(task, ctx) {
            ctx.events.warning(&err.to_string());
        }
        let message = if task.completion_message.is_empty() {
            format!("post-processing of remote results returned {post}")
        } else {
            task.completion_message.clone()
        };
        return terminal(post, message);
    }

    match executor.copy_results_to_transfer_directory(task, ctx) {
        Ok(_) => terminal(CloseoutCode::Success, marker.message),
        Err(err) => {
            ctx.events.error(&err.to_string());
            terminal(
                CloseoutCode::Failed,
                format!("failed to copy results to transfer directory: {err}"),
            )
        }
    }
}

fn finish_failed(
    task: &mut Task,
    executor: &mut dyn ToolExecutor,
    ctx: &mut PluginContext<'_>,
    marker: Option<RemoteMarker>,
    problem: Option<String>,
) -> RemotePollResult {
    let declared = marker
        .as_ref()
        .map(|marker| marker.result_files.clone())
        .unwrap_or_default();
    if let Err(err) = executor.retrieve_remote_results(task, ctx, &declared) {
        ctx.events
            .warning(&format!("could not retrieve partial remote results: {err}"));
    }
    if let Err(err) = executor.copy_failed_results_to_archive_directory(task, ctx) {
        ctx.events.warning(&err.to_string());
    }
    let message = problem
        .or_else(|| marker.map(|marker| marker.message))
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("{} failed remotely", task.job_step_stem()));
    ctx.events.error(&message);
    RemotePollResult {
        code: CloseoutCode::FailedRemote,
        message,
        next_poll_at: None,
    }
}

fn remove_remote_files(
    transfer: &dyn RemoteTransfer,
    descriptor: &RemoteDescriptor,
) -> Result<(), RemoteError> {
    for path in [
        &descriptor.info_file,
        &descriptor.lock_file,
        &descriptor.success_file,
        &descriptor.fail_file,
    ] {
        transfer.remove_file(path)?;
    }
    transfer.remove_dir_all(&descriptor.work_dir)
}
