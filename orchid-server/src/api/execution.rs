//! Execution API Handlers
//!
//! HTTP endpoints for launching jobs and reading executions.

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use futures::Stream;
use orchid_core::domain::execution::Execution;
use orchid_core::output::{Sentinel, escape_line};
use orchid_engine::EngineError;
use orchid_engine::repository::OutputStream;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// Execution id path segment; a malformed id is a JSON `400`
pub struct ExecutionId(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for ExecutionId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state).await?;
        Ok(ExecutionId(id))
    }
}

// =============================================================================
// Execution Lifecycle Endpoints
// =============================================================================

/// POST /runs/{job_id}
/// Launch a run of a job
pub async fn run_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Execution>> {
    tracing::info!("Launching job: {}", job_id);

    let execution = state.dispatcher.run_job(&job_id).await?;

    Ok(Json(execution))
}

/// GET /logs/list
/// List all executions
pub async fn list_executions(State(state): State<AppState>) -> ApiResult<Json<Vec<Execution>>> {
    tracing::debug!("Listing executions");

    let executions = state.dispatcher.list_executions().await?;

    Ok(Json(executions))
}

/// GET /logs/{id}/status
/// Get one execution record
pub async fn get_execution(
    State(state): State<AppState>,
    ExecutionId(id): ExecutionId,
) -> ApiResult<Json<Execution>> {
    tracing::debug!("Getting execution: {}", id);

    let execution = state.dispatcher.get_execution(id).await?;

    Ok(Json(execution))
}

/// POST /logs/{id}/cancel
/// Request cancellation of a running execution
pub async fn cancel_execution(
    State(state): State<AppState>,
    ExecutionId(id): ExecutionId,
) -> ApiResult<StatusCode> {
    tracing::info!("Cancelling execution: {}", id);

    state.dispatcher.cancel(id).await?;

    Ok(StatusCode::ACCEPTED)
}

// =============================================================================
// Output Streaming
// =============================================================================

/// GET /logs/{id}
/// Stream an execution's output
///
/// The body replays the output from the start and stays open until the
/// execution ends. It carries one line per output line and exactly one
/// sentinel line last. If reading fails midway the body is cut short without
/// a sentinel, which clients report as an incomplete stream.
pub async fn stream_output(
    State(state): State<AppState>,
    ExecutionId(id): ExecutionId,
) -> ApiResult<Response> {
    tracing::debug!("Streaming output of execution: {}", id);

    let stream = state.dispatcher.open_output(id).await?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(output_body(stream)),
    )
        .into_response())
}

/// Turns an output reader into body chunks, ending with the sentinel line
fn output_body(stream: OutputStream) -> impl Stream<Item = Result<Bytes, EngineError>> + Send {
    futures::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;

        match stream.next_line().await {
            Ok(Some(line)) => {
                let mut chunk = escape_line(&line).into_owned();
                chunk.push('\n');
                Some((Ok(Bytes::from(chunk)), Some(stream)))
            }
            Ok(None) => {
                let sentinel = stream.sentinel().unwrap_or(Sentinel::Error);
                let chunk = format!("{}\n", sentinel.as_line());
                Some((Ok(Bytes::from(chunk)), None))
            }
            Err(e) => {
                tracing::error!(
                    "Output stream of execution {} failed: {}",
                    stream.execution_id(),
                    e
                );
                Some((Err(e), None))
            }
        }
    })
}
