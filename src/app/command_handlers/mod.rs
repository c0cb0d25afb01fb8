use crate::app::cli::{Cli, Command, ManifestCommand};
use crate::app::command_support::ensure_runtime_root;

pub mod agent;
pub mod manifest;
pub mod queue;

/// Text to print plus the process exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exit_code: 0,
        }
    }
}

pub fn run_cli(cli: Cli) -> Result<CommandOutput, String> {
    let paths = ensure_runtime_root(cli.state_root.as_deref())?;
    match cli.command {
        Command::Run(args) => agent::cmd_run(&paths, &args),
        Command::Enqueue(args) => queue::cmd_enqueue(&paths, &args).map(CommandOutput::ok),
        Command::Manifest {
            command: ManifestCommand::Check { tool },
        } => manifest::cmd_manifest_check(&paths, &tool).map(CommandOutput::ok),
        Command::Status => agent::cmd_status(&paths).map(CommandOutput::ok),
        Command::Abort => agent::cmd_abort(&paths).map(CommandOutput::ok),
    }
}
