//! Engine error type

use orchid_client::ClientError;
use orchid_core::domain::execution::TransitionError;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while building, running or querying executions
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown job, machine, script or execution
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Local filesystem or process failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure talking to a remote Orchid server
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed input or record
    #[error("Validation error: {0}")]
    Validation(String),

    /// The execution is not in a state that allows the request
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A step could not be started or did not complete successfully
    #[error("Step {step} ({script}) failed: {reason}")]
    StepFailed {
        step: usize,
        script: String,
        reason: String,
    },

    /// A step panicked inside the engine
    #[error("Execution aborted: {0}")]
    Aborted(String),
}

/// Coarse classification used by callers to map errors onto exit codes or
/// HTTP statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Io,
    Transport,
    Validation,
    Conflict,
    StepFailed,
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Io(_) => ErrorKind::Io,
            EngineError::Transport(_) => ErrorKind::Transport,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::InvalidState(_) => ErrorKind::Conflict,
            EngineError::StepFailed { .. } | EngineError::Aborted(_) => ErrorKind::StepFailed,
        }
    }
}

impl From<TransitionError> for EngineError {
    fn from(err: TransitionError) -> Self {
        EngineError::InvalidState(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<ClientError> for EngineError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ApiError { status: 404, message } => EngineError::NotFound {
                kind: "Remote resource",
                id: message,
            },
            ClientError::ApiError { status: 409, message } => EngineError::InvalidState(message),
            ClientError::ApiError { status: 400, message } => EngineError::Validation(message),
            ClientError::ParseError(message) => EngineError::Validation(message),
            other => EngineError::Transport(other.to_string()),
        }
    }
}
