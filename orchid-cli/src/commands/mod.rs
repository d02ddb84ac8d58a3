//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod execution;
mod setup;

use std::process::ExitCode;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a job and follow its output
    Run {
        /// Job ID from jobs.json
        job: String,
    },
    /// List all executions
    List,
    /// Follow the output of an execution
    Logs {
        /// Execution ID or unambiguous prefix
        id: String,
    },
    /// Show the status of an execution
    Status {
        /// Execution ID or unambiguous prefix
        id: String,
    },
    /// Cancel a running execution
    Cancel {
        /// Execution ID or unambiguous prefix
        id: String,
    },
    /// List configured jobs and their steps
    Jobs,
    /// List configured machines
    Machines,
    /// List available scripts
    Scripts,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module and returns the
/// process exit code.
pub async fn handle_command(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Run { job } => execution::run_job(config, &job).await,
        Commands::List => execution::list_executions(config).await,
        Commands::Logs { id } => execution::follow_logs(config, &id).await,
        Commands::Status { id } => execution::show_status(config, &id).await,
        Commands::Cancel { id } => execution::cancel_execution(config, &id).await,
        Commands::Jobs => setup::list_jobs(config),
        Commands::Machines => setup::list_machines(config),
        Commands::Scripts => setup::list_scripts(config),
    }
}
