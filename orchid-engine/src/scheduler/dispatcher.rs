//! Execution dispatcher
//!
//! Single entry point for callers (CLI and server). Every operation runs
//! either in this process, against the local configuration, or against a
//! remote Orchid server, chosen once when the dispatcher is created.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use orchid_client::OrchidClient;
use orchid_core::domain::execution::Execution;
use orchid_core::domain::setup::Setup;
use orchid_core::output::Sentinel;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::repository::{JournalStatusStore, OutputChannels, OutputStream, StatusStore};
use crate::service::{PipelineBuilder, PipelineRunner};

/// Local or remote execution of every operation
pub enum Dispatcher {
    Local(LocalDispatcher),
    Remote(RemoteDispatcher),
}

impl Dispatcher {
    /// Starts a run of a job and returns its freshly created record
    ///
    /// Returns once the execution exists; steps run in the background.
    pub async fn run_job(&self, job_id: &str) -> Result<Execution> {
        match self {
            Dispatcher::Local(local) => local.run_job(job_id).await,
            Dispatcher::Remote(remote) => remote.run_job(job_id).await,
        }
    }

    /// Lists all executions
    pub async fn list_executions(&self) -> Result<Vec<Execution>> {
        match self {
            Dispatcher::Local(local) => local.list_executions().await,
            Dispatcher::Remote(remote) => remote.list_executions().await,
        }
    }

    /// Gets one execution record
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution> {
        match self {
            Dispatcher::Local(local) => local.get_execution(execution_id).await,
            Dispatcher::Remote(remote) => remote.get_execution(execution_id).await,
        }
    }

    /// Copies an execution's output into `sink`, following it until it ends
    ///
    /// Each output line is written followed by `\n`. The terminal sentinel is
    /// not written; it is returned instead.
    pub async fn get_output<W>(&self, execution_id: Uuid, sink: &mut W) -> Result<Sentinel>
    where
        W: AsyncWrite + Unpin + Send,
    {
        match self {
            Dispatcher::Local(local) => local.get_output(execution_id, sink).await,
            Dispatcher::Remote(remote) => remote.get_output(execution_id, sink).await,
        }
    }

    /// Requests cancellation of an in-flight execution
    pub async fn cancel(&self, execution_id: Uuid) -> Result<()> {
        match self {
            Dispatcher::Local(local) => local.cancel(execution_id).await,
            Dispatcher::Remote(remote) => remote.cancel(execution_id).await,
        }
    }

    /// Cancels local runs and waits for them to seal their output
    pub async fn shutdown(&self) {
        if let Dispatcher::Local(local) = self {
            local.shutdown().await;
        }
    }
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type Runs = Arc<Mutex<HashMap<Uuid, RunHandle>>>;

/// Removes a run from the registry when its task ends, even by panic
struct RunSlot {
    execution_id: Uuid,
    runs: Runs,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.execution_id);
    }
}

/// Runs executions in this process
#[derive(Clone)]
pub struct LocalDispatcher {
    config: Arc<EngineConfig>,
    setup: Arc<Setup>,
    store: Arc<dyn StatusStore>,
    channels: OutputChannels,
    runner: Arc<PipelineRunner>,
    runs: Runs,
}

impl LocalDispatcher {
    /// Creates a dispatcher backed by the journal under the configuration root
    pub async fn open(config: EngineConfig, setup: Setup) -> Result<Self> {
        let store = JournalStatusStore::open(config.journal_path(), config.compaction_factor).await?;
        Ok(Self::with_store(config, setup, Arc::new(store)))
    }

    /// Creates a dispatcher persisting through the given store
    pub fn with_store(config: EngineConfig, setup: Setup, store: Arc<dyn StatusStore>) -> Self {
        let channels = OutputChannels::new(config.logs_dir(), config.poll_interval);
        let runner = Arc::new(PipelineRunner::new(store.clone(), &config));

        Self {
            config: Arc::new(config),
            setup: Arc::new(setup),
            store,
            channels,
            runner,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn run_job(&self, job_id: &str) -> Result<Execution> {
        let pipeline = PipelineBuilder::new(&self.config, &self.setup, &self.channels)
            .build(job_id)
            .await?;
        let execution = pipeline.execution.clone();

        // The record exists before any step can run or any reader can ask.
        if let Err(e) = self.store.save(&execution).await {
            if let Err(cleanup) = pipeline.output.discard().await {
                warn!("Failed to discard output of execution {}: {}", execution.id, cleanup);
            }
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let runner = self.runner.clone();
        let slot = RunSlot {
            execution_id: execution.id,
            runs: self.runs.clone(),
        };

        // Hold the registry while spawning so the task cannot deregister first.
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let task = tokio::spawn(async move {
            let _slot = slot;
            let execution = runner.run(pipeline, token).await;
            debug!("Run task of execution {} done ({})", execution.id, execution.status);
        });
        runs.insert(execution.id, RunHandle { cancel, task });
        drop(runs);

        info!("Launched execution {} of job '{}'", execution.id, job_id);
        Ok(execution)
    }

    pub async fn list_executions(&self) -> Result<Vec<Execution>> {
        self.store.load_all().await
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution> {
        self.store.load_one(execution_id).await
    }

    /// Opens a following reader over an execution's output
    pub async fn open_output(&self, execution_id: Uuid) -> Result<OutputStream> {
        self.channels.stream(execution_id).await
    }

    pub async fn get_output<W>(&self, execution_id: Uuid, sink: &mut W) -> Result<Sentinel>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut stream = self.open_output(execution_id).await?;
        while let Some(line) = stream.next_line().await? {
            sink.write_all(line.as_bytes()).await?;
            sink.write_all(b"\n").await?;
            sink.flush().await?;
        }

        stream.sentinel().ok_or_else(|| {
            EngineError::InvalidState(format!("Output of {} ended without a sentinel", execution_id))
        })
    }

    pub async fn cancel(&self, execution_id: Uuid) -> Result<()> {
        let token = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
            .map(|run| run.cancel.clone());

        if let Some(token) = token {
            info!("Cancelling execution {}", execution_id);
            token.cancel();
            return Ok(());
        }

        let execution = self.store.load_one(execution_id).await?;
        if execution.status.is_terminal() {
            Err(EngineError::InvalidState(format!(
                "Execution {} already ended with status {}",
                execution_id, execution.status
            )))
        } else {
            Err(EngineError::InvalidState(format!(
                "Execution {} is not running in this process",
                execution_id
            )))
        }
    }

    /// Ids of executions still running in this process
    pub fn running(&self) -> Vec<Uuid> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub async fn shutdown(&self) {
        let runs: Vec<(Uuid, RunHandle)> = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        if runs.is_empty() {
            return;
        }

        info!("Cancelling {} running execution(s)", runs.len());
        for (_, run) in &runs {
            run.cancel.cancel();
        }
        for (execution_id, run) in runs {
            if let Err(e) = run.task.await {
                warn!("Run task of execution {} failed: {}", execution_id, e);
            }
        }
    }
}

/// Forwards every operation to a remote Orchid server
#[derive(Debug, Clone)]
pub struct RemoteDispatcher {
    client: OrchidClient,
}

impl RemoteDispatcher {
    pub fn new(client: OrchidClient) -> Self {
        Self { client }
    }

    pub async fn run_job(&self, job_id: &str) -> Result<Execution> {
        Ok(self.client.run_job(job_id).await?)
    }

    pub async fn list_executions(&self) -> Result<Vec<Execution>> {
        Ok(self.client.list_executions().await?)
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution> {
        Ok(self.client.get_execution(execution_id).await?)
    }

    pub async fn get_output<W>(&self, execution_id: Uuid, sink: &mut W) -> Result<Sentinel>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut lines = self.client.stream_output(execution_id).await?;
        while let Some(line) = lines.next_line().await? {
            sink.write_all(line.as_bytes()).await?;
            sink.write_all(b"\n").await?;
            sink.flush().await?;
        }

        lines.sentinel().ok_or_else(|| {
            EngineError::Transport(format!("Output of {} ended without a sentinel", execution_id))
        })
    }

    pub async fn cancel(&self, execution_id: Uuid) -> Result<()> {
        Ok(self.client.cancel_execution(execution_id).await?)
    }
}
