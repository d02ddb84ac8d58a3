//! Orchid CLI
//!
//! Command-line interface for running jobs and inspecting executions, either
//! in this process or on a remote Orchid server.

mod commands;
mod config;
mod id_resolver;
mod types;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "orchid")]
#[command(about = "Orchid job runner CLI", long_about = None)]
struct Cli {
    /// Configuration directory holding jobs, machines, scripts and keys
    #[arg(long, env = "ORCHID_PATH", default_value = "ci")]
    path: PathBuf,

    /// Forward execution commands to the server described in server.json
    #[arg(short, long)]
    remote: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // stdout carries job output, so diagnostics go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchid_engine=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        root: cli.path,
        remote: cli.remote,
    };

    handle_command(cli.command, &config).await
}
