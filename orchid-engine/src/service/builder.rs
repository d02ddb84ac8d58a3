//! Pipeline builder
//!
//! Turns a job id into a ready-to-run [`Pipeline`]:
//! - Looks the job up in the setup
//! - Resolves every step into a local or remote process launch
//! - Allocates the execution record and its output channel
//!
//! All steps are resolved before anything is allocated, so an invalid job
//! leaves no trace behind.

use orchid_core::domain::execution::Execution;
use orchid_core::domain::setup::{Setup, Step};
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::pipeline::{Pipeline, RemoteEndpoint, StepInvocation, StepTarget};
use crate::process::shell_quote;
use crate::repository::OutputChannels;

/// Builds pipelines for jobs of one setup
pub struct PipelineBuilder<'a> {
    config: &'a EngineConfig,
    setup: &'a Setup,
    channels: &'a OutputChannels,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(config: &'a EngineConfig, setup: &'a Setup, channels: &'a OutputChannels) -> Self {
        Self {
            config,
            setup,
            channels,
        }
    }

    /// Builds a pipeline for the job `job_id`
    ///
    /// # Errors
    /// `NotFound` for an unknown job, machine or script; `Validation` for a
    /// machine whose port is not a valid number.
    pub async fn build(&self, job_id: &str) -> Result<Pipeline> {
        let job = self
            .setup
            .job(job_id)
            .ok_or_else(|| EngineError::not_found("Job", job_id))?;

        let execution = Execution::new(job_id);

        let steps = job
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| self.resolve_step(i + 1, step, &execution))
            .collect::<Result<Vec<_>>>()?;

        let output = self.channels.open(execution.id).await?;

        debug!(
            "Built execution {} of job '{}' with {} step(s)",
            execution.id,
            job_id,
            steps.len()
        );

        Ok(Pipeline {
            execution,
            steps,
            output,
        })
    }

    /// Resolves one job step into a process launch
    pub fn resolve_step(
        &self,
        index: usize,
        step: &Step,
        execution: &Execution,
    ) -> Result<StepInvocation> {
        let script_path = self.config.scripts_dir().join(&step.script);
        if !script_path.is_file() {
            return Err(EngineError::not_found("Script", &step.script));
        }

        let env = vec![
            ("ORCHID_EXECUTION_ID".to_string(), execution.id.to_string()),
            ("ORCHID_JOB_ID".to_string(), execution.job_id.clone()),
            ("ORCHID_STEP".to_string(), index.to_string()),
        ];

        if step.is_local() {
            let mut args = vec![script_path.to_string_lossy().into_owned()];
            args.extend(step.args.iter().cloned());

            return Ok(StepInvocation {
                index,
                script: step.script.clone(),
                target: StepTarget::Local,
                program: self.config.shell.clone(),
                args,
                env,
                working_dir: None,
                stdin: None,
            });
        }

        let endpoint = self.resolve_machine(&step.machine)?;
        let args = self.ssh_args(&endpoint, &step.args, &env, execution.id);

        Ok(StepInvocation {
            index,
            script: step.script.clone(),
            target: StepTarget::Remote(endpoint),
            program: self.config.ssh_program.clone(),
            args,
            env: Vec::new(),
            working_dir: None,
            stdin: Some(script_path),
        })
    }

    fn resolve_machine(&self, machine_id: &str) -> Result<RemoteEndpoint> {
        let machine = self
            .setup
            .machine(machine_id)
            .ok_or_else(|| EngineError::not_found("Machine", machine_id))?;

        let port = machine.port_number().ok_or_else(|| {
            EngineError::Validation(format!(
                "Machine '{}' has an invalid port '{}'",
                machine.id, machine.port
            ))
        })?;

        Ok(RemoteEndpoint {
            machine: machine.id.clone(),
            address: machine.address.clone(),
            port,
            user: machine.user.clone(),
            key: self.config.keys_dir().join(&machine.private_key),
        })
    }

    /// Arguments for the ssh client; the script itself arrives on stdin
    fn ssh_args(
        &self,
        endpoint: &RemoteEndpoint,
        script_args: &[String],
        env: &[(String, String)],
        execution_id: Uuid,
    ) -> Vec<String> {
        let mut remote = String::from("env");
        for (key, value) in env {
            remote.push(' ');
            remote.push_str(&shell_quote(&format!("{}={}", key, value)));
        }
        remote.push_str(" bash -s --");
        for arg in script_args {
            remote.push(' ');
            remote.push_str(&shell_quote(arg));
        }

        debug!("Remote command for execution {}: {}", execution_id, remote);

        vec![
            "-p".to_string(),
            endpoint.port.to_string(),
            "-i".to_string(),
            endpoint.key.to_string_lossy().into_owned(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs().max(1)),
            "--".to_string(),
            format!("{}@{}", endpoint.user, endpoint.address),
            remote,
        ]
    }
}
