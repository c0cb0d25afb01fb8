use super::StopReason;
use crate::config::Settings;
use crate::plugins::{
    PluginContext, PluginResolver, ResourceStager, TaskDirectories, ToolExecutor,
};
use crate::preflight::{self, DiskPolicy, FreeSpaceProbe, PreflightFailure};
use crate::queue::TaskClose;
use crate::remote::{self, MountedRemote, RemoteTransfer, RuntimeSync};
use crate::runtime::{
    append_runtime_log, create_flag, disable_locally, pause_until, take_abort_request, CrashFlag,
    RuntimeError, StatePaths, StatusEventSink, StatusFile,
};
use crate::shared::fs_atomic::atomic_write_json;
use crate::task::{CloseoutCode, Task, SECTION_STEP};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Collaborators one step needs. Borrowed from the dispatch loop for a single task.
pub struct StepEnvironment<'a> {
    pub settings: &'a Settings,
    pub paths: &'a StatePaths,
    pub resolver: &'a mut PluginResolver,
    pub probe: &'a dyn FreeSpaceProbe,
    pub status: &'a mut StatusFile,
    pub runtime_sync: &'a mut RuntimeSync,
}

/// How a claimed step ended. The caller closes the task with `close` exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub close: TaskClose,
    pub stop: Option<StopReason>,
}

impl StepOutcome {
    fn closed(code: CloseoutCode, message: impl Into<String>) -> Self {
        Self {
            close: TaskClose::new(code, message),
            stop: None,
        }
    }

    fn stopping(mut self, reason: StopReason) -> Self {
        self.stop = Some(reason);
        self
    }
}

/// What the plugin phase produced before the post-run checks.
struct PluginRun {
    code: CloseoutCode,
    message: String,
    next_attempt_at: i64,
    needs_abort: bool,
    insufficient_memory: bool,
}

impl PluginRun {
    fn finished(code: CloseoutCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            next_attempt_at: 0,
            needs_abort: false,
            insufficient_memory: false,
        }
    }
}

/// Runs one claimed step from status flag to closeout decision.
pub fn run_step(env: &mut StepEnvironment<'_>, task: &mut Task, now: i64) -> StepOutcome {
    let stem = task.job_step_stem();
    if let Err(err) = create_flag(env.paths, CrashFlag::Status, &format!("running {stem}")) {
        return StepOutcome::closed(CloseoutCode::ResetJobStep, err.to_string())
            .stopping(StopReason::WorkDirProblem);
    }
    env.status.begin_task(task);

    let working_dir = env.settings.manager.working_dir.clone();
    let snapshot = working_dir.join(task.parameter_file_name());
    if let Err(err) = atomic_write_json(&snapshot, &task.params) {
        return StepOutcome::closed(
            CloseoutCode::Failed,
            format!("failed to write {}: {err}", snapshot.display()),
        );
    }

    // Polling a remote step reads nothing from the local dataset or reference stores.
    if task.remote.is_none() {
        if let Err(failure) = preflight::validate_for_task(env.settings, task, env.probe) {
            if let Err(err) = apply_disk_policy(env.paths, env.settings, &failure, now) {
                tracing::error!("failed to record disk space policy: {err}");
            }
            return StepOutcome::closed(CloseoutCode::ResetJobStep, failure.to_string())
                .stopping(StopReason::DiskSpace);
        }
    }

    let run = match catch_unwind(AssertUnwindSafe(|| run_plugins(env, task, now))) {
        Ok(run) => run,
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            append_runtime_log(
                env.paths,
                "error",
                "step.panic",
                &format!("{stem}: plugin panicked: {reason}"),
            );
            PluginRun::finished(CloseoutCode::Failed, format!("plugin panicked: {reason}"))
        }
    };

    if run.insufficient_memory {
        let minutes = env.settings.recovery.memory_pause_minutes;
        let until = now.saturating_add(secs_i64(minutes.saturating_mul(60)));
        let reason = format!("insufficient memory while running {stem}");
        if let Err(err) = pause_until(env.paths, until, &reason, now) {
            tracing::error!("failed to write pause marker: {err}");
        }
        return StepOutcome {
            close: TaskClose::new(CloseoutCode::ResetJobStepInsufficientMemory, reason)
                .retry_at(until),
            stop: None,
        };
    }
    if run.needs_abort || take_abort_request(env.paths) {
        let message = if run.message.is_empty() {
            format!("{stem} aborted")
        } else {
            run.message
        };
        return StepOutcome::closed(CloseoutCode::Failed, message)
            .stopping(StopReason::AbortRequested);
    }

    StepOutcome {
        close: TaskClose::new(run.code, run.message).retry_at(run.next_attempt_at),
        stop: None,
    }
}

/// A full working directory turns the agent off; any other directory pauses claiming.
pub fn apply_disk_policy(
    paths: &StatePaths,
    settings: &Settings,
    failure: &PreflightFailure,
    now: i64,
) -> Result<(), RuntimeError> {
    append_runtime_log(paths, "error", "preflight.disk_space", &failure.to_string());
    match failure.policy() {
        DiskPolicy::DisableLocally => disable_locally(paths, &failure.to_string(), now),
        DiskPolicy::PauseTemporarily => {
            let pause_secs = secs_i64(settings.disk.pause_hours.saturating_mul(3600));
            let until = now.saturating_add(pause_secs);
            pause_until(paths, until, &failure.to_string(), now).map(|_| ())
        }
    }
}

fn run_plugins(env: &mut StepEnvironment<'_>, task: &mut Task, now: i64) -> PluginRun {
    let settings = env.settings;
    let mut stager = match env.resolver.resolve_stager(&task.tool, settings) {
        Ok(stager) => stager,
        Err(err) => return PluginRun::finished(CloseoutCode::Failed, err.to_string()),
    };
    let mut executor = match env.resolver.resolve_executor(&task.tool, settings) {
        Ok(executor) => executor,
        Err(err) => return PluginRun::finished(CloseoutCode::Failed, err.to_string()),
    };

    let dirs = TaskDirectories::from_settings(settings);
    let requested_host = match &task.remote {
        Some(descriptor) => Some(descriptor.host.clone()),
        None if task.runs_remotely() => Some(
            task.params
                .get_str(SECTION_STEP, "RemoteHost")
                .unwrap_or_default()
                .to_string(),
        ),
        None => None,
    };
    let remote_host = requested_host
        .as_deref()
        .and_then(|name| settings.resolve_remote_host(Some(name)))
        .map(|(name, host)| MountedRemote::new(name, host.root.clone()));

    let mut sink = StatusEventSink::new(&mut *env.status);
    let mut ctx = PluginContext {
        events: &mut sink,
        remote: remote_host.as_ref().map(|host| host as &dyn RemoteTransfer),
        dirs: &dirs,
    };

    let mut run = if task.remote.is_some() {
        poll_remote(task, executor.as_mut(), &mut ctx, settings, now)
    } else {
        run_local_or_stage(
            task,
            stager.as_mut(),
            executor.as_mut(),
            &mut ctx,
            settings,
            env.runtime_sync,
            now,
        )
    };
    run.needs_abort = stager.needs_abort() || executor.needs_abort();
    run.insufficient_memory = stager.insufficient_memory() || executor.insufficient_memory();
    if run.message.is_empty() {
        run.message = task.completion_message.clone();
    }
    run
}

fn poll_remote(
    task: &mut Task,
    executor: &mut dyn ToolExecutor,
    ctx: &mut PluginContext<'_>,
    settings: &Settings,
    now: i64,
) -> PluginRun {
    if ctx.remote.is_none() {
        let host = task
            .remote
            .as_ref()
            .map(|descriptor| descriptor.host.clone())
            .unwrap_or_default();
        return PluginRun::finished(
            CloseoutCode::FailedRemote,
            format!("remote host `{host}` is not configured"),
        );
    }
    match remote::poll_remote_task(task, executor, ctx, &settings.remote, now) {
        Ok(result) => PluginRun {
            next_attempt_at: result.next_poll_at.unwrap_or(0),
            ..PluginRun::finished(result.code, result.message)
        },
        Err(err) => {
            let polls = task.remote.as_mut().map(|descriptor| {
                descriptor.undefined_polls = descriptor.undefined_polls.saturating_add(1);
                descriptor.undefined_polls
            });
            ctx.events.warning(&format!("remote poll failed: {err}"));
            if polls.unwrap_or(u32::MAX) > settings.remote.max_undefined_polls {
                return PluginRun::finished(CloseoutCode::FailedRemote, err.to_string());
            }
            PluginRun {
                next_attempt_at: next_poll(settings, now),
                ..PluginRun::finished(CloseoutCode::RunningRemote, err.to_string())
            }
        }
    }
}

fn run_local_or_stage(
    task: &mut Task,
    stager: &mut dyn ResourceStager,
    executor: &mut dyn ToolExecutor,
    ctx: &mut PluginContext<'_>,
    settings: &Settings,
    runtime_sync: &mut RuntimeSync,
    now: i64,
) -> PluginRun {
    let staged = stager.get_resources(task, ctx);
    if staged != CloseoutCode::Success {
        return PluginRun::finished(staged, String::new());
    }

    if task.runs_remotely() {
        if let Some(transfer) = ctx.remote {
            return match remote::stage_task(
                transfer,
                runtime_sync,
                settings.remote.runtime_files_dir.as_deref(),
                task,
                &ctx.dirs.working_dir,
                settings.manager_name(),
                now,
            ) {
                Ok(descriptor) => PluginRun {
                    next_attempt_at: next_poll(settings, now),
                    ..PluginRun::finished(
                        CloseoutCode::RunningRemote,
                        format!("staged on {}", descriptor.host),
                    )
                },
                Err(err) => {
                    ctx.events.error(&err.to_string());
                    PluginRun::finished(
                        CloseoutCode::Failed,
                        format!("remote staging failed: {err}"),
                    )
                }
            };
        }
        ctx.events.warning(
            "step asks to run remotely but no remote host is configured; running locally",
        );
    }

    let code = executor.run(task, ctx);
    if code == CloseoutCode::Success {
        if let Err(err) = executor.copy_results_to_transfer_directory(task, ctx) {
            ctx.events.error(&err.to_string());
            return PluginRun::finished(
                CloseoutCode::Failed,
                format!("failed to copy results to transfer directory: {err}"),
            );
        }
    } else if code.counts_as_critical_failure() {
        if let Err(err) = executor.copy_failed_results_to_archive_directory(task, ctx) {
            ctx.events.warning(&err.to_string());
        }
    }
    PluginRun::finished(code, String::new())
}

fn next_poll(settings: &Settings, now: i64) -> i64 {
    now.saturating_add(secs_i64(settings.remote.poll_interval_seconds))
}

fn secs_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
