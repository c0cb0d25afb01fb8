use super::manager_state::{ManagerState, PARAM_CLEANUP_MODE, PARAM_UPDATE_REQUIRED};
use super::step_runner::{apply_disk_policy, run_step, StepEnvironment, StepOutcome};
use super::StopReason;
use crate::config::{load_settings, CleanupMode, ConfigWatcher, Settings};
use crate::plugins::{PluginRegistry, PluginResolver};
use crate::preflight::{
    ensure_working_dir_empty, validate_before_claim, FreeSpaceProbe, StatvfsProbe, WorkDirCheck,
};
use crate::queue::{AgentBackend, ClaimOutcome, ClaimRequest, TaskClose};
use crate::remote::RuntimeSync;
use crate::runtime::{
    active_pause, append_runtime_log, backoff_delay, clean_working_directory, clear_flag,
    create_flag, flag_exists, local_disable, take_abort_request, CrashFlag, ManagerStatus,
    MessageClass, Pacer, PeriodicIntervals, PeriodicLogger, StatePaths, StatusFile, TaskStatus,
    ThreadPacer,
};
use crate::shared::time::{format_rfc3339, now_secs};
use crate::task::{CloseoutCode, Task};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Duration;

pub type Clock = Box<dyn Fn() -> i64>;

/// Claims and runs job steps one at a time until a stop condition fires.
pub struct DispatchLoop<B: AgentBackend> {
    paths: StatePaths,
    settings: Settings,
    settings_path: Option<PathBuf>,
    backend: B,
    resolver: PluginResolver,
    probe: Box<dyn FreeSpaceProbe>,
    pacer: Box<dyn Pacer>,
    watcher: ConfigWatcher,
    state: ManagerState,
    periodic: PeriodicLogger,
    status: StatusFile,
    runtime_sync: RuntimeSync,
    clock: Clock,
}

impl<B: AgentBackend> DispatchLoop<B> {
    pub fn new(paths: StatePaths, settings: Settings, backend: B) -> Self {
        let resolver = PluginResolver::new(&paths.root, PluginRegistry::with_builtins());
        let periodic =
            PeriodicLogger::load(&paths, PeriodicIntervals::from_settings(&settings.recovery));
        let status = StatusFile::new(&paths, settings.manager_name());
        Self {
            state: ManagerState::from_settings(&settings),
            paths,
            settings,
            settings_path: None,
            backend,
            resolver,
            probe: Box::new(StatvfsProbe),
            pacer: Box::new(ThreadPacer),
            watcher: ConfigWatcher::inert(),
            periodic,
            status,
            runtime_sync: RuntimeSync::default(),
            clock: Box::new(now_secs),
        }
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.resolver = PluginResolver::new(&self.paths.root, registry);
        self
    }

    pub fn with_probe(mut self, probe: impl FreeSpaceProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_pacer(mut self, pacer: impl Pacer + 'static) -> Self {
        self.pacer = Box::new(pacer);
        self
    }

    /// Reloads `path` whenever `watcher` reports a change.
    pub fn with_watcher(mut self, path: impl Into<PathBuf>, watcher: ConfigWatcher) -> Self {
        self.settings_path = Some(path.into());
        self.watcher = watcher;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> i64 + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn state(&self) -> &ManagerState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn run(&mut self, max_iterations: u32) -> StopReason {
        self.status.set_manager(ManagerStatus::Starting, "");
        append_runtime_log(
            &self.paths,
            "info",
            "dispatch.started",
            &format!(
                "manager {} starting, max iterations {max_iterations}",
                self.settings.manager_name()
            ),
        );

        let mut iterations = 0;
        let reason = loop {
            if iterations >= max_iterations {
                break StopReason::IterationLimit;
            }
            iterations += 1;
            if let Some(reason) = self.iterate() {
                break reason;
            }
        };
        self.finish(reason)
    }

    fn iterate(&mut self) -> Option<StopReason> {
        let now = (self.clock)();
        if take_abort_request(&self.paths) {
            return Some(StopReason::AbortRequested);
        }
        if let Err(reason) = self.refresh_settings(now) {
            return Some(reason);
        }

        if let Some(reason) = self.disabled_reason(now) {
            self.status.set_manager(ManagerStatus::Disabled, &reason);
            self.post_periodic(MessageClass::Disabled, "warn", &reason, now);
            return Some(StopReason::Disabled);
        }

        if self.state.update_required {
            if let Err(err) = self
                .backend
                .set_manager_param(PARAM_UPDATE_REQUIRED, "false", now)
            {
                tracing::error!("failed to acknowledge update request: {err}");
            }
            self.state.update_required = false;
            self.status
                .set_manager(ManagerStatus::Stopped, "update required");
            return Some(StopReason::UpdateRequired);
        }

        if flag_exists(&self.paths, CrashFlag::ErrorDeletingFiles) {
            if let Some(reason) = self.retry_failed_cleanup(now) {
                return Some(reason);
            }
        }

        if flag_exists(&self.paths, CrashFlag::Status) && !self.auto_clean(now) {
            let message = format!(
                "{} exists in {}; previous step did not finish, manual cleanup required",
                CrashFlag::Status.label(),
                self.paths.root.display()
            );
            self.status
                .set_manager(ManagerStatus::FlagFileExists, &message);
            self.post_periodic(MessageClass::CrashFlag, "error", &message, now);
            return Some(StopReason::CrashFlagPresent);
        }

        if self.state.excessive_failures() {
            let message = format!(
                "{} consecutive step failures; manager stopping",
                self.state.critical_failures
            );
            self.raise_status_flag(&message);
            self.status.set_manager(ManagerStatus::Error, &message);
            self.post_periodic(MessageClass::General, "error", &message, now);
            return Some(StopReason::ExcessiveFailures);
        }

        match ensure_working_dir_empty(&self.settings.manager.working_dir) {
            Ok(WorkDirCheck::RemovedStrayParameterFile(path)) => {
                tracing::info!(path = %path.display(), "removed stray parameter file");
            }
            Ok(_) => {}
            Err(err) => {
                let message = err.to_string();
                self.raise_status_flag(&message);
                self.status.set_manager(ManagerStatus::Error, &message);
                self.post_periodic(MessageClass::General, "error", &message, now);
                return Some(StopReason::WorkDirProblem);
            }
        }

        if let Err(failure) = validate_before_claim(&self.settings, self.probe.as_ref()) {
            if let Err(err) = apply_disk_policy(&self.paths, &self.settings, &failure, now) {
                tracing::error!("failed to record disk space policy: {err}");
            }
            let message = failure.to_string();
            self.status.set_manager(ManagerStatus::Paused, &message);
            self.post_periodic(MessageClass::General, "error", &message, now);
            return Some(StopReason::DiskSpace);
        }

        let request = ClaimRequest {
            step_tools: self.settings.manager.step_tools.clone(),
        };
        let mut task = match self.backend.claim(&request, now) {
            ClaimOutcome::TaskFound(task) => {
                self.state.record_task_found();
                *task
            }
            ClaimOutcome::NoTaskFound => {
                self.state.record_no_task();
                return Some(StopReason::NoTaskFound);
            }
            ClaimOutcome::ResultError(message) => {
                self.state.record_result_error();
                tracing::error!("claiming a step failed: {message}");
                self.backoff();
                return None;
            }
            ClaimOutcome::Deadlock(message) => {
                let limit_reached = self.state.record_deadlock();
                tracing::warn!(
                    deadlocks = self.state.deadlocks,
                    "claiming a step deadlocked: {message}"
                );
                if limit_reached {
                    return Some(StopReason::ExcessiveDeadlocks);
                }
                self.backoff();
                return None;
            }
        };

        self.status.set_manager(ManagerStatus::Running, "");
        let outcome = self.run_claimed(&mut task, now);
        self.close_task(&mut task, &outcome.close, now);
        self.state.record_closeout(outcome.close.code);
        self.status.end_task(task_status(outcome.close.code));

        self.cleanup_after_task(&task);

        if outcome.stop.is_some() {
            return outcome.stop;
        }
        if take_abort_request(&self.paths) {
            return Some(StopReason::AbortRequested);
        }
        None
    }

    fn run_claimed(&mut self, task: &mut Task, now: i64) -> StepOutcome {
        let mut env = StepEnvironment {
            settings: &self.settings,
            paths: &self.paths,
            resolver: &mut self.resolver,
            probe: self.probe.as_ref(),
            status: &mut self.status,
            runtime_sync: &mut self.runtime_sync,
        };
        match catch_unwind(AssertUnwindSafe(|| run_step(&mut env, task, now))) {
            Ok(outcome) => outcome,
            Err(_) => StepOutcome {
                close: TaskClose::new(CloseoutCode::Failed, "step runner panicked"),
                stop: None,
            },
        }
    }

    fn close_task(&mut self, task: &mut Task, close: &TaskClose, now: i64) {
        task.result_code = Some(close.code);
        task.set_completion_message(close.message.clone());
        let stem = task.job_step_stem();
        match self.backend.close(task, close, now) {
            Ok(()) => {
                tracing::info!(step = %stem, code = close.code.as_str(), "step closed");
                append_runtime_log(
                    &self.paths,
                    "info",
                    "step.closed",
                    &format!("{stem} closed with {}: {}", close.code, close.message),
                );
            }
            Err(err) => {
                self.state.record_result_error();
                tracing::error!(step = %stem, "failed to close step: {err}");
                append_runtime_log(
                    &self.paths,
                    "error",
                    "step.close_failed",
                    &format!("{stem}: {err}"),
                );
            }
        }
    }

    fn refresh_settings(&mut self, now: i64) -> Result<(), StopReason> {
        if self.watcher.take_changed() {
            if let Some(path) = self.settings_path.clone() {
                match load_settings(&path) {
                    Ok(settings) => {
                        self.state.apply_local_settings(&settings);
                        self.periodic
                            .set_intervals(PeriodicIntervals::from_settings(&settings.recovery));
                        self.settings = settings;
                        append_runtime_log(
                            &self.paths,
                            "info",
                            "settings.reloaded",
                            &path.display().to_string(),
                        );
                        return Ok(());
                    }
                    Err(err) => {
                        tracing::error!("failed to reload settings: {err}");
                        self.status.set_manager(ManagerStatus::Error, &err.to_string());
                        return Err(StopReason::SettingsUnavailable);
                    }
                }
            }
        }

        if !self
            .state
            .refresh_due(now, self.settings.queue.settings_refresh_seconds)
        {
            return Ok(());
        }
        match self.backend.load_manager_params() {
            Ok(params) => {
                for problem in self.state.apply_remote_params(&params, now) {
                    tracing::warn!("ignoring manager param: {problem}");
                }
                Ok(())
            }
            Err(err) => {
                tracing::error!("failed to load manager params: {err}");
                self.status.set_manager(ManagerStatus::Error, &err.to_string());
                Err(StopReason::SettingsUnavailable)
            }
        }
    }

    fn disabled_reason(&self, now: i64) -> Option<String> {
        if !self.state.active_local {
            return Some("manager is disabled in local settings".to_string());
        }
        match local_disable(&self.paths) {
            Ok(Some(record)) => return Some(format!("manager disabled locally: {}", record.reason)),
            Ok(None) => {}
            Err(err) => return Some(format!("cannot read local disable marker: {err}")),
        }
        if !self.state.active_remote {
            return Some("manager is disabled in the control store".to_string());
        }
        match active_pause(&self.paths, now) {
            Ok(Some(pause)) => Some(format!(
                "manager paused until {}: {}",
                format_rfc3339(pause.until),
                pause.reason
            )),
            Ok(None) => None,
            Err(err) => Some(format!("cannot read pause marker: {err}")),
        }
    }

    fn retry_failed_cleanup(&mut self, now: i64) -> Option<StopReason> {
        match clean_working_directory(&self.settings.manager.working_dir) {
            Ok(removed) => {
                tracing::info!(removed, "working directory cleaned on retry");
                if let Err(err) = clear_flag(&self.paths, CrashFlag::ErrorDeletingFiles) {
                    tracing::error!("failed to clear flag: {err}");
                }
                None
            }
            Err(err) => {
                let message = format!("working directory still cannot be cleaned: {err}");
                if let Err(err) = clear_flag(&self.paths, CrashFlag::ErrorDeletingFiles) {
                    tracing::error!("failed to clear flag: {err}");
                }
                self.raise_status_flag(&message);
                self.status.set_manager(ManagerStatus::Error, &message);
                self.post_periodic(MessageClass::CrashFlag, "error", &message, now);
                Some(StopReason::WorkDirProblem)
            }
        }
    }

    /// Clears a leftover status flag when the cleanup mode allows it.
    fn auto_clean(&mut self, now: i64) -> bool {
        let mode = self.state.cleanup_mode;
        if mode == CleanupMode::Disabled {
            return false;
        }
        if let Err(err) = clean_working_directory(&self.settings.manager.working_dir) {
            tracing::error!(mode = mode.as_str(), "automatic cleanup failed: {err}");
            return false;
        }
        match self.backend.recover_orphaned_claims() {
            Ok(0) => {}
            Ok(recovered) => tracing::info!(recovered, "returned orphaned claims to the queue"),
            Err(err) => tracing::warn!("failed to recover orphaned claims: {err}"),
        }
        for flag in [CrashFlag::Status, CrashFlag::ErrorDeletingFiles] {
            if let Err(err) = clear_flag(&self.paths, flag) {
                tracing::error!("failed to clear {}: {err}", flag.label());
                return false;
            }
        }
        if mode == CleanupMode::CleanOnce {
            if let Err(err) = self.backend.set_manager_param(
                PARAM_CLEANUP_MODE,
                CleanupMode::Disabled.as_str(),
                now,
            ) {
                tracing::warn!("failed to reset cleanup mode: {err}");
            }
            self.state.cleanup_mode = CleanupMode::Disabled;
        }
        append_runtime_log(
            &self.paths,
            "warn",
            "recovery.auto_clean",
            &format!("status flag cleared with cleanup mode {}", mode.as_str()),
        );
        true
    }

    fn cleanup_after_task(&mut self, task: &Task) {
        let dir = self.settings.manager.working_dir.clone();
        let mut result = clean_working_directory(&dir);
        if result.is_err() {
            self.pacer.sleep(Duration::from_millis(
                self.settings.recovery.settle_delay_ms,
            ));
            result = clean_working_directory(&dir);
        }
        if let Err(err) = clear_flag(&self.paths, CrashFlag::Status) {
            tracing::error!("failed to clear status flag: {err}");
        }
        if let Err(err) = result {
            let context = format!("{}: {err}", task.job_step_stem());
            tracing::error!("failed to clean working directory after {context}");
            if let Err(err) = create_flag(&self.paths, CrashFlag::ErrorDeletingFiles, &context) {
                tracing::error!("failed to write error-deleting flag: {err}");
            }
        }
    }

    fn raise_status_flag(&self, context: &str) {
        if let Err(err) = create_flag(&self.paths, CrashFlag::Status, context) {
            tracing::error!("failed to write status flag: {err}");
        }
    }

    fn post_periodic(&mut self, class: MessageClass, level: &str, message: &str, now: i64) {
        if let Err(err) = self
            .periodic
            .log(&mut self.backend, class, level, message, now)
        {
            tracing::warn!("failed to persist periodic message cache: {err}");
        }
    }

    fn backoff(&self) {
        let delay = backoff_delay(self.state.critical_failures, self.state.deadlocks);
        tracing::debug!(delay_secs = delay.as_secs(), "backing off before next claim");
        self.pacer.sleep(delay);
    }

    fn finish(&mut self, reason: StopReason) -> StopReason {
        let current = self.status.status().manager_status;
        if matches!(
            current,
            ManagerStatus::Starting | ManagerStatus::Running | ManagerStatus::Idle
        ) {
            let status = if reason.is_error() {
                ManagerStatus::Error
            } else {
                ManagerStatus::Stopped
            };
            self.status.set_manager(status, reason.as_str());
        }
        let level = if reason.is_error() { "error" } else { "info" };
        append_runtime_log(
            &self.paths,
            level,
            "dispatch.stopped",
            &format!("stopped: {reason}"),
        );
        tracing::info!(reason = reason.as_str(), "dispatch loop stopped");
        reason
    }
}

fn task_status(code: CloseoutCode) -> TaskStatus {
    if code == CloseoutCode::RunningRemote {
        TaskStatus::RunningRemote
    } else if code.counts_as_critical_failure() {
        TaskStatus::Failed
    } else {
        TaskStatus::Completed
    }
}
