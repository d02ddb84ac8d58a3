//! Configuration directory loading
//!
//! Layout of a configuration root:
//! - `machines.json`: list of [`Machine`]
//! - `jobs.json`: list of [`Job`]
//! - `server.json`: the [`RemoteServer`] used by remote commands
//! - `scripts/`: step scripts, referenced by path relative to this directory
//! - `keys/`: ssh identity files, referenced by machines

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::domain::server::RemoteServer;
use crate::domain::setup::{Job, LOCAL_MACHINE, Machine, Setup};
use crate::error::SetupError;

pub const MACHINES_FILE: &str = "machines.json";
pub const JOBS_FILE: &str = "jobs.json";
pub const SERVER_FILE: &str = "server.json";
pub const SCRIPTS_DIR: &str = "scripts";
pub const KEYS_DIR: &str = "keys";

pub type Result<T> = std::result::Result<T, SetupError>;

impl Setup {
    /// Loads and validates the setup stored under `root`
    pub fn load(root: &Path) -> Result<Self> {
        let machines: Vec<Machine> = read_json(&root.join(MACHINES_FILE))?;
        let jobs: Vec<Job> = read_json(&root.join(JOBS_FILE))?;
        let scripts = list_files(&root.join(SCRIPTS_DIR))?;
        let keys = list_files(&root.join(KEYS_DIR))?;

        validate_machines(&machines, &keys)?;
        validate_jobs(&jobs, &machines, &scripts)?;

        Ok(Setup {
            machines,
            jobs,
            scripts,
        })
    }
}

impl RemoteServer {
    /// Loads and validates `server.json` under `root`
    pub fn load(root: &Path) -> Result<Self> {
        let server: RemoteServer = read_json(&root.join(SERVER_FILE))?;
        server.validate()?;
        Ok(server)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(SetupError::InvalidServer(
                "Server must have a non-empty Address".to_string(),
            ));
        }
        if self.port.trim().parse::<u16>().is_err() {
            return Err(SetupError::InvalidServer(format!(
                "Server port '{}' is not a valid port",
                self.port
            )));
        }
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read(path).map_err(|source| SetupError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_slice(&data).map_err(|source| SetupError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Lists every file below `dir` as a `/`-separated relative path
///
/// A missing directory yields an empty list.
fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }

    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current).map_err(|source| SetupError::Io {
            path: current.clone(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(dir) {
                let parts: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(parts.join("/"));
            }
        }
    }

    files.sort();
    Ok(files)
}

fn validate_machines(machines: &[Machine], keys: &[String]) -> Result<()> {
    for machine in machines {
        if machine.id.is_empty() {
            return Err(SetupError::InvalidMachine(
                "Each machine must have a non-empty Id".to_string(),
            ));
        }
        if machine.id == LOCAL_MACHINE {
            return Err(SetupError::InvalidMachine(format!(
                "Machine id '{}' is reserved",
                LOCAL_MACHINE
            )));
        }
        if machine.address.is_empty() {
            return Err(SetupError::InvalidMachine(format!(
                "Machine '{}' must have a non-empty Address",
                machine.id
            )));
        }
        if machine.port_number().is_none() {
            return Err(SetupError::InvalidMachine(format!(
                "Machine '{}' has invalid Port '{}'",
                machine.id, machine.port
            )));
        }
        if machine.user.is_empty() {
            return Err(SetupError::InvalidMachine(format!(
                "Machine '{}' must have a non-empty User",
                machine.id
            )));
        }
        if machine.private_key.is_empty() {
            return Err(SetupError::InvalidMachine(format!(
                "Machine '{}' must have a non-empty PrivateKey",
                machine.id
            )));
        }
        if !keys.iter().any(|key| *key == machine.private_key) {
            return Err(SetupError::InvalidMachine(format!(
                "Machine '{}' references unknown PrivateKey '{}'",
                machine.id, machine.private_key
            )));
        }
    }

    Ok(())
}

fn validate_jobs(jobs: &[Job], machines: &[Machine], scripts: &[String]) -> Result<()> {
    for job in jobs {
        if job.id.is_empty() {
            return Err(SetupError::InvalidJob(
                "Each job must have a non-empty Id".to_string(),
            ));
        }
        if job.steps.is_empty() {
            return Err(SetupError::InvalidJob(format!(
                "Job '{}' must have a non-empty Pipeline",
                job.id
            )));
        }

        for step in &job.steps {
            if !step.is_local() && !machines.iter().any(|m| m.id == step.machine) {
                return Err(SetupError::InvalidJob(format!(
                    "Job '{}' references unknown machine '{}'",
                    job.id, step.machine
                )));
            }
            if !scripts.iter().any(|script| *script == step.script) {
                return Err(SetupError::InvalidJob(format!(
                    "Job '{}' references unknown script '{}'",
                    job.id, step.script
                )));
            }
        }
    }

    Ok(())
}
