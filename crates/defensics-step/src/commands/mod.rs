//! CLI command dispatch and execution

use anyhow::Result;
use clap::{Parser, Subcommand};

mod config_cmd;
mod run;

/// defensics-step - run a Defensics fuzz test as a CI build step
#[derive(Parser, Debug)]
#[command(
    name = "defensics-step",
    version,
    about = "Run a Defensics fuzz test as a CI build step",
    long_about = "Submits a fuzzing run to a Defensics API server, waits for it to finish, \
                  publishes the report and exits with 0 (SUCCESS), 1 (FAILURE) or 2 (ABORTED)"
)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the build step
    Run(run::RunArgs),

    /// Inspect a job configuration
    #[command(subcommand)]
    Config(config_cmd::ConfigCommand),
}

impl Cli {
    /// Execute the CLI command, returning the process exit code
    pub async fn execute(self) -> Result<i32> {
        defensics_runner::logging::init(self.verbose);
        match self.command {
            Commands::Run(args) => run::execute(args).await,
            Commands::Config(command) => config_cmd::execute(command).map(|()| 0),
        }
    }
}
