use super::events::EventSink;
use super::results;
use crate::config::Settings;
use crate::remote::{RemoteError, RemoteTransfer};
use crate::task::{CloseoutCode, Task};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read plugin manifest {path}: {source}")]
    ManifestRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse plugin manifest {path}: {source}")]
    ManifestParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("no {kind} is registered in the manifest for step tool `{tool}`")]
    UnknownTool { kind: &'static str, tool: String },
    #[error("plugin class `{class}` is not known to this agent")]
    UnknownClass { class: String },
    #[error("plugin class `{class}` could not be constructed: {reason}")]
    Construct { class: String, reason: String },
    #[error("remote operation failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("no remote host is available for job step {stem}")]
    NoRemote { stem: String },
    #[error("command `{command}` failed to start: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command `{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> PluginError {
    PluginError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Local directories a task reads from and writes to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDirectories {
    pub working_dir: PathBuf,
    pub transfer_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub failed_results_dir: Option<PathBuf>,
}

impl TaskDirectories {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            working_dir: settings.manager.working_dir.clone(),
            transfer_dir: settings.manager.transfer_dir.clone(),
            cache_dir: settings.manager.cache_dir.clone(),
            failed_results_dir: settings.manager.failed_results_dir.clone(),
        }
    }

    /// Results go to the transfer dir, or the cache dir when no transfer dir is set.
    pub fn results_root(&self) -> Option<&Path> {
        self.transfer_dir
            .as_deref()
            .or(self.cache_dir.as_deref())
    }
}

/// Handed to plugin constructors.
#[derive(Debug, Clone)]
pub struct PluginSetup {
    pub manager_name: String,
    pub dirs: TaskDirectories,
    pub settings: Settings,
    /// The manifest entry's `module` value, interpreted by the plugin class.
    pub module: String,
}

/// Handed to every plugin call.
pub struct PluginContext<'a> {
    pub events: &'a mut dyn EventSink,
    pub remote: Option<&'a dyn RemoteTransfer>,
    pub dirs: &'a TaskDirectories,
}

/// Gathers the inputs a step needs into the working directory.
pub trait ResourceStager {
    fn get_resources(&mut self, task: &mut Task, ctx: &mut PluginContext<'_>) -> CloseoutCode;

    fn needs_abort(&self) -> bool {
        false
    }

    fn insufficient_memory(&self) -> bool {
        false
    }
}

/// Runs a step tool. The remote hooks have file-drop defaults that suit most tools.
pub trait ToolExecutor {
    fn run(&mut self, task: &mut Task, ctx: &mut PluginContext<'_>) -> CloseoutCode;

    /// Pulls result files of a remote run into the working directory. `declared` comes
    /// from the success marker; when empty every non-bookkeeping remote file is fetched.
    fn retrieve_remote_results(
        &mut self,
        task: &mut Task,
        ctx: &mut PluginContext<'_>,
        declared: &[String],
    ) -> Result<Vec<String>, PluginError> {
        results::retrieve_remote_files(task, ctx, declared)
    }

    fn post_process_remote_results(
        &mut self,
        _task: &mut Task,
        _ctx: &mut PluginContext<'_>,
    ) -> CloseoutCode {
        CloseoutCode::Success
    }

    fn copy_results_to_transfer_directory(
        &mut self,
        task: &mut Task,
        ctx: &mut PluginContext<'_>,
    ) -> Result<usize, PluginError> {
        results::copy_results_to_transfer(task, ctx)
    }

    fn copy_failed_results_to_archive_directory(
        &mut self,
        task: &mut Task,
        ctx: &mut PluginContext<'_>,
    ) -> Result<usize, PluginError> {
        results::archive_failed_results(task, ctx)
    }

    fn needs_abort(&self) -> bool {
        false
    }

    fn insufficient_memory(&self) -> bool {
        false
    }
}
