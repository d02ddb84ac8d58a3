//! Pipeline types
//!
//! These types only exist at runtime during an execution.
//! They are built from a job definition and consumed by the runner.

use std::fmt;
use std::path::PathBuf;

use orchid_core::domain::execution::Execution;

use crate::error::EngineError;
use crate::repository::OutputWriter;

/// A fully resolved, ready-to-run execution of a job
pub struct Pipeline {
    /// Status record, still `New`
    pub execution: Execution,
    /// Steps in job order
    pub steps: Vec<StepInvocation>,
    /// Exclusive writer of this execution's output
    pub output: OutputWriter,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("execution", &self.execution)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

/// Where a step runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTarget {
    Local,
    Remote(RemoteEndpoint),
}

/// Connection details of a remote machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub machine: String,
    pub address: String,
    pub port: u16,
    pub user: String,
    pub key: PathBuf,
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.address, self.port)
    }
}

/// One step, resolved into a concrete process launch
///
/// For local steps the program is the shell and the script path is its first
/// argument. Remote steps launch the ssh client and pipe the script into the
/// remote shell through `stdin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInvocation {
    /// 1-based position in the job
    pub index: usize,
    /// Script reference as written in the job definition
    pub script: String,
    pub target: StepTarget,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    /// File streamed to the process's standard input
    pub stdin: Option<PathBuf>,
}

impl StepInvocation {
    /// Name of the machine the step runs on
    pub fn machine(&self) -> &str {
        match &self.target {
            StepTarget::Local => orchid_core::domain::setup::LOCAL_MACHINE,
            StepTarget::Remote(endpoint) => &endpoint.machine,
        }
    }

    /// Builds the error reported when this step fails
    pub fn failed(&self, reason: impl Into<String>) -> EngineError {
        EngineError::StepFailed {
            step: self.index,
            script: self.script.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StepInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({}) on {}", self.index, self.script, self.machine())
    }
}
