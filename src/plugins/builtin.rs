use super::capability::{
    io_error, PluginContext, PluginError, PluginSetup, ResourceStager, ToolExecutor,
};
use crate::task::{CloseoutCode, Task, SECTION_STEP};
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 3600;

/// For tools whose inputs are already where the executor expects them.
#[derive(Debug, Default)]
pub struct StagerNoResources;

impl ResourceStager for StagerNoResources {
    fn get_resources(&mut self, _task: &mut Task, _ctx: &mut PluginContext<'_>) -> CloseoutCode {
        CloseoutCode::Success
    }
}

/// Copies input files into the working directory.
///
/// The manifest `module` names the source directory; `{dataset}` in it is replaced with
/// the task's dataset. A step parameter `InputFolder` overrides it per step.
#[derive(Debug)]
pub struct StagerCopyInputs {
    source_template: String,
}

impl StagerCopyInputs {
    pub fn from_setup(setup: &PluginSetup) -> Result<Self, PluginError> {
        Ok(Self {
            source_template: setup.module.trim().to_string(),
        })
    }

    fn source_dir(&self, task: &Task) -> Option<PathBuf> {
        let template = task
            .params
            .get_str(SECTION_STEP, "InputFolder")
            .unwrap_or(&self.source_template);
        if template.is_empty() {
            return None;
        }
        Some(PathBuf::from(template.replace("{dataset}", &task.dataset)))
    }
}

impl ResourceStager for StagerCopyInputs {
    fn get_resources(&mut self, task: &mut Task, ctx: &mut PluginContext<'_>) -> CloseoutCode {
        let Some(source) = self.source_dir(task) else {
            task.set_completion_message("no input folder configured");
            return CloseoutCode::FileNotFound;
        };
        if !source.is_dir() {
            task.set_completion_message(format!("input folder {} not found", source.display()));
            return CloseoutCode::FileNotFound;
        }
        match copy_inputs(&source, &ctx.dirs.working_dir) {
            Ok(0) => {
                task.set_completion_message(format!("no input files in {}", source.display()));
                CloseoutCode::NoUsableInputFiles
            }
            Ok(copied) => {
                ctx.events
                    .status(&format!("staged {copied} input file(s) from {}", source.display()));
                CloseoutCode::Success
            }
            Err(err) => {
                ctx.events.error(&err.to_string());
                task.set_completion_message(err.to_string());
                CloseoutCode::Failed
            }
        }
    }
}

fn copy_inputs(source: &Path, working_dir: &Path) -> Result<usize, PluginError> {
    fs::create_dir_all(working_dir).map_err(|e| io_error(working_dir, e))?;
    let mut copied = 0;
    for entry in fs::read_dir(source).map_err(|e| io_error(source, e))? {
        let path = entry.map_err(|e| io_error(source, e))?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        let target = working_dir.join(name);
        fs::copy(&path, &target).map_err(|e| io_error(&target, e))?;
        copied += 1;
    }
    Ok(copied)
}

/// Runs an external command in the working directory.
///
/// The manifest `module` holds the command line. `{working_dir}`, `{job}`, `{step}` and
/// `{dataset}` are substituted per task. The step parameter `TimeoutSeconds` bounds the
/// run time.
#[derive(Debug)]
pub struct ExecutorCommand {
    program: String,
    args: Vec<String>,
    insufficient_memory: bool,
}

#[derive(Debug)]
struct CommandOutput {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl ExecutorCommand {
    pub fn from_setup(setup: &PluginSetup) -> Result<Self, PluginError> {
        let mut parts = setup.module.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| PluginError::Construct {
            class: "ExecutorCommand".to_string(),
            reason: "manifest module must name a command".to_string(),
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
            insufficient_memory: false,
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn expand(value: &str, task: &Task, working_dir: &Path) -> String {
        value
            .replace("{working_dir}", &working_dir.display().to_string())
            .replace("{job}", &task.job.to_string())
            .replace("{step}", &task.step.to_string())
            .replace("{dataset}", &task.dataset)
    }

    fn spawn_and_wait(
        &self,
        task: &Task,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, PluginError> {
        let command_form = self.command_line();
        let mut command = Command::new(Self::expand(&self.program, task, working_dir));
        command
            .current_dir(working_dir)
            .args(self.args.iter().map(|arg| Self::expand(arg, task, working_dir)))
            .env("STEPAGENT_JOB", task.job.to_string())
            .env("STEPAGENT_STEP", task.step.to_string())
            .env("STEPAGENT_TOOL", &task.tool)
            .env("STEPAGENT_DATASET", &task.dataset)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| PluginError::Spawn {
            command: command_form.clone(),
            source,
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_error(working_dir, std::io::Error::other("missing stdout pipe")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_error(working_dir, std::io::Error::other("missing stderr pipe")))?;

        let stdout_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = BufReader::new(stdout).read_to_string(&mut buf);
            buf
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf);
            buf
        });

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        let _ = stdout_reader.join();
                        let _ = stderr_reader.join();
                        return Err(PluginError::Timeout {
                            command: command_form,
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) => return Err(io_error(working_dir, err)),
            }
        };

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: stderr_reader.join().unwrap_or_default(),
        })
    }
}

impl ToolExecutor for ExecutorCommand {
    fn run(&mut self, task: &mut Task, ctx: &mut PluginContext<'_>) -> CloseoutCode {
        let timeout = Duration::from_secs(
            task.params
                .get_u64(SECTION_STEP, "TimeoutSeconds")
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        );
        ctx.events.status(&format!("running {}", self.command_line()));

        let output = match self.spawn_and_wait(task, &ctx.dirs.working_dir, timeout) {
            Ok(output) => output,
            Err(err) => {
                ctx.events.error(&err.to_string());
                task.set_completion_message(err.to_string());
                return CloseoutCode::Failed;
            }
        };

        for line in output.stdout.lines().filter(|line| !line.trim().is_empty()) {
            ctx.events.debug(line);
        }
        if output.exit_code == Some(0) {
            return CloseoutCode::Success;
        }

        let stderr = output.stderr.trim();
        if stderr.to_ascii_lowercase().contains("out of memory") {
            self.insufficient_memory = true;
        }
        let message = format!(
            "{} exited with {}: {}",
            self.program,
            output
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            stderr.lines().last().unwrap_or("")
        );
        ctx.events.error(&message);
        task.set_completion_message(message);
        CloseoutCode::Failed
    }

    fn insufficient_memory(&self) -> bool {
        self.insufficient_memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::plugins::{EventLog, TaskDirectories};
    use tempfile::tempdir;

    fn setup(module: &str, working_dir: &Path) -> PluginSetup {
        PluginSetup {
            manager_name: "pub-1".to_string(),
            dirs: TaskDirectories {
                working_dir: working_dir.to_path_buf(),
                ..TaskDirectories::default()
            },
            settings: Settings::for_manager("pub-1", working_dir),
            module: module.to_string(),
        }
    }

    #[test]
    fn command_executor_requires_a_command() {
        let dir = tempdir().expect("tempdir");
        assert!(ExecutorCommand::from_setup(&setup("   ", dir.path())).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_executor_maps_exit_codes() {
        let dir = tempdir().expect("tempdir");
        let dirs = TaskDirectories {
            working_dir: dir.path().to_path_buf(),
            ..TaskDirectories::default()
        };
        let mut task = Task::new(5, 1, "Sync", "ds");
        let mut events = EventLog::default();

        let mut ok = ExecutorCommand::from_setup(&setup("true", dir.path())).expect("true");
        let mut ctx = PluginContext {
            events: &mut events,
            remote: None,
            dirs: &dirs,
        };
        assert_eq!(ok.run(&mut task, &mut ctx), CloseoutCode::Success);

        let mut bad = ExecutorCommand::from_setup(&setup("false", dir.path())).expect("false");
        assert_eq!(bad.run(&mut task, &mut ctx), CloseoutCode::Failed);
        assert!(task.completion_message.contains("exited with 1"));
    }

    #[test]
    fn copy_stager_reports_missing_and_empty_inputs() {
        let dir = tempdir().expect("tempdir");
        let inputs = dir.path().join("inputs/ds");
        fs::create_dir_all(&inputs).expect("inputs");
        let dirs = TaskDirectories {
            working_dir: dir.path().join("work"),
            ..TaskDirectories::default()
        };
        let template = format!("{}/inputs/{{dataset}}", dir.path().display());
        let mut stager = StagerCopyInputs::from_setup(&setup(&template, &dirs.working_dir))
            .expect("stager");
        let mut events = EventLog::default();
        let mut ctx = PluginContext {
            events: &mut events,
            remote: None,
            dirs: &dirs,
        };

        let mut missing = Task::new(1, 1, "Sync", "absent");
        assert_eq!(
            stager.get_resources(&mut missing, &mut ctx),
            CloseoutCode::FileNotFound
        );

        let mut task = Task::new(1, 1, "Sync", "ds");
        assert_eq!(
            stager.get_resources(&mut task, &mut ctx),
            CloseoutCode::NoUsableInputFiles
        );

        fs::write(inputs.join("a.raw"), "a").expect("input");
        assert_eq!(stager.get_resources(&mut task, &mut ctx), CloseoutCode::Success);
        assert!(dirs.working_dir.join("a.raw").is_file());
    }
}
