//! Setup listings
//!
//! Jobs, machines and scripts are always read from the local configuration
//! directory, also with `--remote`.

use std::process::ExitCode;

use anyhow::Result;
use colored::*;
use orchid_core::domain::setup::{Job, Machine, Step};

use crate::config::Config;

/// List configured jobs with their steps
pub fn list_jobs(config: &Config) -> Result<ExitCode> {
    let setup = config.load_setup()?;

    if setup.jobs.is_empty() {
        println!("{}", "No jobs configured.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", setup.jobs.len()).bold());
        println!();
        for job in &setup.jobs {
            print_job_summary(job);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// List configured machines
pub fn list_machines(config: &Config) -> Result<ExitCode> {
    let setup = config.load_setup()?;

    if setup.machines.is_empty() {
        println!("{}", "No machines configured.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} machine(s):", setup.machines.len()).bold()
        );
        println!();
        for machine in &setup.machines {
            print_machine_summary(machine);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// List scripts found under the scripts directory
pub fn list_scripts(config: &Config) -> Result<ExitCode> {
    let setup = config.load_setup()?;

    if setup.scripts.is_empty() {
        println!("{}", "No scripts found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} script(s):", setup.scripts.len()).bold()
        );
        for script in &setup.scripts {
            println!("  {} {}", "▸".cyan(), script);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_job_summary(job: &Job) {
    println!("  {} Job {}", "▸".cyan(), job.id.bold());
    for (index, step) in job.steps.iter().enumerate() {
        println!("    {}. {}", index + 1, describe_step(step));
    }
    println!();
}

fn print_machine_summary(machine: &Machine) {
    println!("  {} Machine {}", "▸".cyan(), machine.id.bold());
    println!(
        "    Address:  {}@{}:{}",
        machine.user, machine.address, machine.port
    );
    println!("    Key:      {}", machine.private_key.dimmed());
    println!();
}

/// One-line form of a step: `script [args...] on machine`
fn describe_step(step: &Step) -> String {
    let mut line = step.script.clone();
    for arg in &step.args {
        line.push(' ');
        line.push_str(arg);
    }
    format!("{} on {}", line, step.machine)
}
