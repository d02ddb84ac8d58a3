//! Shared test fixtures: a throwaway configuration root with scripts

use std::time::Duration;

use orchid_core::domain::setup::{Job, Machine, Setup, Step};
use tempfile::TempDir;

use crate::config::EngineConfig;
use crate::repository::OutputChannels;

pub(crate) struct Fixture {
    pub dir: TempDir,
    pub config: EngineConfig,
    pub channels: OutputChannels,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::new(dir.path());
        config.poll_interval = Duration::from_millis(10);
        config.connect_timeout = Duration::from_secs(1);
        std::fs::create_dir_all(config.scripts_dir()).unwrap();

        let channels = OutputChannels::new(config.logs_dir(), config.poll_interval);
        Self {
            dir,
            config,
            channels,
        }
    }

    /// Writes a bash script below the scripts directory
    pub fn script(&self, name: &str, body: &str) {
        let path = self.config.scripts_dir().join(name);
        std::fs::write(path, format!("#!/bin/bash\n{}\n", body)).unwrap();
    }

    pub fn step(&self, machine: &str, script: &str, args: &[&str]) -> Step {
        Step {
            machine: machine.to_string(),
            script: script.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn job(&self, id: &str, steps: Vec<Step>) -> Job {
        Job {
            id: id.to_string(),
            steps,
        }
    }

    pub fn machine(&self, id: &str, address: &str, port: &str) -> Machine {
        Machine {
            id: id.to_string(),
            address: address.to_string(),
            port: port.to_string(),
            user: "ci".to_string(),
            private_key: format!("id_{}", id),
        }
    }

    pub fn setup_with_jobs(&self, jobs: Vec<Job>) -> Setup {
        Setup {
            machines: Vec::new(),
            jobs,
            scripts: Vec::new(),
        }
    }
}
