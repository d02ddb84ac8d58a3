//! Execution command handlers
//!
//! Running jobs, following output and inspecting executions. Every handler
//! goes through the dispatcher chosen by `--remote`.

use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::*;
use orchid_core::domain::execution::{Execution, ExecutionStatus};
use orchid_core::output::Sentinel;
use orchid_engine::Dispatcher;
use uuid::Uuid;

use crate::config::Config;
use crate::id_resolver::resolve_execution_id;

/// Exit code after the user interrupts with Ctrl-C
const INTERRUPTED: u8 = 130;

/// Run a job, print its id, then follow its output to stdout
pub async fn run_job(config: &Config, job_id: &str) -> Result<ExitCode> {
    let dispatcher = config.dispatcher().await?;

    let execution = dispatcher
        .run_job(job_id)
        .await
        .with_context(|| format!("Failed to run job '{}'", job_id))?;

    println!("{} {}", "Execution".bold(), execution.id.to_string().cyan());

    let code = match follow_output(&dispatcher, execution.id).await? {
        Some(sentinel) => exit_code(sentinel),
        None => {
            eprintln!("{}", "Interrupted, cancelling execution...".yellow());
            if let Err(e) = dispatcher.cancel(execution.id).await {
                tracing::warn!("Failed to cancel execution {}: {}", execution.id, e);
            }
            ExitCode::from(INTERRUPTED)
        }
    };

    // Local runs are awaited here so their status and output get sealed
    dispatcher.shutdown().await;

    Ok(code)
}

/// List all executions
pub async fn list_executions(config: &Config) -> Result<ExitCode> {
    let dispatcher = config.dispatcher().await?;
    let executions = dispatcher.list_executions().await?;

    if executions.is_empty() {
        println!("{}", "No executions found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} execution(s):", executions.len()).bold()
        );
        println!();
        for execution in &executions {
            print_execution_summary(execution);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Follow the output of an existing execution
///
/// Interrupting detaches from the output without cancelling the execution.
pub async fn follow_logs(config: &Config, id: &str) -> Result<ExitCode> {
    let dispatcher = config.dispatcher().await?;
    let execution_id = resolve_execution_id(&dispatcher, id).await?;

    match follow_output(&dispatcher, execution_id).await? {
        Some(sentinel) => Ok(exit_code(sentinel)),
        None => Ok(ExitCode::from(INTERRUPTED)),
    }
}

/// Show the status of an execution
pub async fn show_status(config: &Config, id: &str) -> Result<ExitCode> {
    let dispatcher = config.dispatcher().await?;
    let execution_id = resolve_execution_id(&dispatcher, id).await?;

    let execution = dispatcher.get_execution(execution_id).await?;
    print_execution_details(&execution);

    Ok(ExitCode::SUCCESS)
}

/// Request cancellation of a running execution
pub async fn cancel_execution(config: &Config, id: &str) -> Result<ExitCode> {
    let dispatcher = config.dispatcher().await?;
    let execution_id = resolve_execution_id(&dispatcher, id).await?;

    dispatcher
        .cancel(execution_id)
        .await
        .with_context(|| format!("Failed to cancel execution {}", execution_id))?;

    println!(
        "{}",
        format!("✓ Cancellation of {} requested", execution_id)
            .green()
            .bold()
    );

    Ok(ExitCode::SUCCESS)
}

/// Copies output to stdout until the sentinel, or `None` on Ctrl-C
async fn follow_output(dispatcher: &Dispatcher, execution_id: Uuid) -> Result<Option<Sentinel>> {
    let mut stdout = tokio::io::stdout();

    let sentinel = tokio::select! {
        result = dispatcher.get_output(execution_id, &mut stdout) => {
            result.with_context(|| format!("Failed to read output of {}", execution_id))?
        }
        _ = interrupted() => return Ok(None),
    };

    match sentinel {
        Sentinel::Finished => eprintln!("{}", "✓ Finished".green().bold()),
        Sentinel::Error => eprintln!("{}", "✗ Error".red().bold()),
    }

    Ok(Some(sentinel))
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn exit_code(sentinel: Sentinel) -> ExitCode {
    ExitCode::from(exit_status(sentinel))
}

fn exit_status(sentinel: Sentinel) -> u8 {
    match sentinel {
        Sentinel::Finished => 0,
        Sentinel::Error => 1,
    }
}

/// Print an execution summary
fn print_execution_summary(execution: &Execution) {
    println!(
        "  {} Execution {}",
        "▸".cyan(),
        execution.id.to_string().dimmed()
    );
    println!("    Job:      {}", execution.job_id.bold());
    println!("    Status:   {}", colorize_status(execution.status));
    if let Some(started) = execution.start_time {
        println!(
            "    Started:  {}",
            started.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    println!();
}

/// Print detailed execution information
fn print_execution_details(execution: &Execution) {
    println!("{}", "Execution Details:".bold());
    println!("  ID:        {}", execution.id.to_string().cyan());
    println!("  Job:       {}", execution.job_id);
    println!("  Status:    {}", colorize_status(execution.status));

    if let Some(started) = execution.start_time {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(ended) = execution.end_time {
        println!("  Ended:     {}", ended.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = execution.start_time {
            let duration = ended.signed_duration_since(started);
            println!("  Duration:  {}s", duration.num_seconds());
        }
    }
}

/// Colorize execution status for display
fn colorize_status(status: ExecutionStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        ExecutionStatus::New => status_str.yellow(),
        ExecutionStatus::Started => status_str.cyan(),
        ExecutionStatus::Finished => status_str.green(),
        ExecutionStatus::Error => status_str.red(),
    }
}
