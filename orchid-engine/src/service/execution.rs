//! Execution service
//!
//! Drives a built pipeline through its lifecycle:
//! - Persisting `Started` before the first step
//! - Running steps one by one, stopping at the first failure
//! - Honoring cancellation and the per-step timeout
//! - Persisting the terminal status, then sealing the output
//!
//! The terminal record is always saved before the sentinel is written, so a
//! reader that sees the sentinel can rely on the stored status.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use orchid_core::domain::execution::Execution;
use orchid_core::output::Sentinel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::pipeline::{Pipeline, StepInvocation};
use crate::process;
use crate::repository::{OutputWriter, StatusStore};

/// Runs pipelines to completion
pub struct PipelineRunner {
    store: Arc<dyn StatusStore>,
    step_timeout: Option<Duration>,
    connect_timeout: Duration,
}

impl PipelineRunner {
    /// Creates a new runner persisting through `store`
    pub fn new(store: Arc<dyn StatusStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            step_timeout: config.step_timeout,
            connect_timeout: config.connect_timeout,
        }
    }

    /// Runs every step of the pipeline and returns the terminal record
    ///
    /// Never fails: step failures, cancellation, persistence problems and
    /// panics all end the execution in `Error`.
    pub async fn run(&self, pipeline: Pipeline, cancel: CancellationToken) -> Execution {
        let Pipeline {
            mut execution,
            steps,
            mut output,
        } = pipeline;

        info!(
            "Starting execution {} of job '{}' ({} step(s))",
            execution.id,
            execution.job_id,
            steps.len()
        );

        let outcome = AssertUnwindSafe(async {
            self.mark_started(&mut execution).await?;
            self.run_steps(&execution, &steps, &mut output, &cancel).await
        })
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(EngineError::Aborted(panic_message(&*panic))));

        self.finalize(execution, output, outcome).await
    }

    async fn mark_started(&self, execution: &mut Execution) -> Result<()> {
        let mut started = execution.clone();
        started.start(Utc::now())?;
        self.store.save(&started).await?;
        *execution = started;
        Ok(())
    }

    async fn run_steps(
        &self,
        execution: &Execution,
        steps: &[StepInvocation],
        output: &mut OutputWriter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for step in steps {
            if cancel.is_cancelled() {
                return Err(step.failed("execution was cancelled"));
            }

            info!(
                "Execution {}: running step {}/{}: {} on {}",
                execution.id,
                step.index,
                steps.len(),
                step.script,
                step.machine()
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Execution {} cancelled during {}", execution.id, step);
                    return Err(step.failed("execution was cancelled"));
                }
                result = self.run_step(step, output) => result?,
            }

            debug!("Execution {}: {} completed", execution.id, step);
        }

        Ok(())
    }

    async fn run_step(&self, step: &StepInvocation, output: &mut OutputWriter) -> Result<()> {
        let run = process::run_step(step, output, self.connect_timeout);

        match self.step_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or_else(|_| Err(step.failed(format!("timed out after {:?}", limit)))),
            None => run.await,
        }
    }

    async fn finalize(
        &self,
        mut execution: Execution,
        output: OutputWriter,
        outcome: Result<()>,
    ) -> Execution {
        let now = Utc::now();
        let transition = match &outcome {
            Ok(()) => execution.finish(now),
            Err(e) => {
                error!("Execution {} of job '{}' failed: {}", execution.id, execution.job_id, e);
                execution.fail(now)
            }
        };
        if let Err(e) = transition {
            error!("{}", e);
        }

        if let Err(e) = self.store.save(&execution).await {
            error!("Failed to persist final status of execution {}: {}", execution.id, e);
        }

        let sentinel = Sentinel::for_status(execution.status).unwrap_or(Sentinel::Error);
        if let Err(e) = output.close(sentinel).await {
            error!("Failed to seal output of execution {}: {}", execution.id, e);
        }

        info!(
            "Execution {} of job '{}' ended with status {}",
            execution.id, execution.job_id, execution.status
        );

        execution
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "step panicked".to_string()
    }
}
