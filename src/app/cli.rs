use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Single-node job step agent.
#[derive(Parser, Debug)]
#[command(name = "stepagent")]
#[command(about = "Claim job steps from a shared queue and run them locally or remotely")]
#[command(version)]
pub struct Cli {
    /// State root holding settings, crash markers and logs. Defaults to `$HOME/.stepagent`.
    #[arg(long, global = true)]
    pub state_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the dispatch loop until a stop condition fires.
    Run(RunArgs),

    /// Insert a job step into the queue.
    Enqueue(EnqueueArgs),

    /// Inspect the plugin manifest.
    Manifest {
        #[command(subcommand)]
        command: ManifestCommand,
    },

    /// Print the last written agent status.
    Status,

    /// Ask a running agent to stop after the current step.
    Abort,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Maximum loop iterations before stopping.
    #[arg(long, default_value = "1")]
    pub max_iterations: u32,
}

#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    pub job: i64,
    pub step: i64,
    pub tool: String,

    #[arg(long, default_value = "")]
    pub dataset: String,

    /// Lower runs first.
    #[arg(long, default_value = "3")]
    pub priority: i64,

    /// Step parameter as `Section.Key=Value`; a bare `Key=Value` lands in StepParameters.
    #[arg(long = "param")]
    pub params: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum ManifestCommand {
    /// Show which stager and executor classes a step tool resolves to.
    Check { tool: String },
}
