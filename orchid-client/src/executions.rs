//! Execution-related API endpoints

use crate::OrchidClient;
use crate::error::Result;
use crate::output::OutputLines;
use orchid_core::domain::execution::Execution;
use reqwest::Method;
use uuid::Uuid;

impl OrchidClient {
    // =============================================================================
    // Execution Lifecycle
    // =============================================================================

    /// Start a run of the job with the given id
    ///
    /// Returns as soon as the server has created the execution; the steps run
    /// in the background on the server.
    pub async fn run_job(&self, job_id: &str) -> Result<Execution> {
        let response = self.request(Method::POST, &["runs", job_id])?.send().await?;

        self.handle_response(response).await
    }

    /// List all executions known to the server
    pub async fn list_executions(&self) -> Result<Vec<Execution>> {
        let response = self.request(Method::GET, &["logs", "list"])?.send().await?;

        self.handle_response(response).await
    }

    /// Get the status record of one execution
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution> {
        let id = execution_id.to_string();
        let response = self
            .request(Method::GET, &["logs", &id, "status"])?
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Ask the server to cancel an in-flight execution
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<()> {
        let id = execution_id.to_string();
        let response = self
            .request(Method::POST, &["logs", &id, "cancel"])?
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Execution Output
    // =============================================================================

    /// Open the output stream of an execution
    ///
    /// The server replays the output from the beginning and keeps the response
    /// open until the execution reaches a terminal state.
    pub async fn stream_output(&self, execution_id: Uuid) -> Result<OutputLines> {
        let id = execution_id.to_string();
        let response = self.request(Method::GET, &["logs", &id])?.send().await?;
        let response = Self::check_status(response).await?;

        tracing::debug!("Streaming output of execution {}", execution_id);

        Ok(OutputLines::new(execution_id, response))
    }
}
