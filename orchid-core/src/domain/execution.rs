//! Execution domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One run of a job
///
/// Structure shared between the engine (persists and updates) and remote
/// callers (receive it over HTTP).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub job_id: String,
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Lifecycle state of an execution
///
/// Moves strictly forward: `New -> Started -> Finished | Error`, or
/// `New -> Error` when a run aborts before its first step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    New,
    Started,
    Finished,
    Error,
}

impl ExecutionStatus {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Finished | ExecutionStatus::Error)
    }

    /// Whether a record in this state may be replaced by one in `next`
    ///
    /// Re-saving the same state is allowed so that upserts stay idempotent.
    pub fn can_advance_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;

        matches!(
            (self, next),
            (New, New)
                | (New, Started)
                | (New, Error)
                | (Started, Started)
                | (Started, Finished)
                | (Started, Error)
                | (Finished, Finished)
                | (Error, Error)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::New => write!(f, "New"),
            ExecutionStatus::Started => write!(f, "Started"),
            ExecutionStatus::Finished => write!(f, "Finished"),
            ExecutionStatus::Error => write!(f, "Error"),
        }
    }
}

/// Rejected status change
#[derive(Debug, Clone, Error)]
#[error("Execution {id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: Uuid,
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

impl Execution {
    /// Creates a fresh execution record for a job with a newly generated id
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job_id.into(),
            status: ExecutionStatus::New,
            start_time: None,
            end_time: None,
        }
    }

    /// Marks the execution as started at `at`
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.advance(ExecutionStatus::Started)?;
        self.start_time = Some(at);
        Ok(())
    }

    /// Marks the execution as finished successfully at `at`
    pub fn finish(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.advance(ExecutionStatus::Finished)?;
        self.end_time = Some(at);
        Ok(())
    }

    /// Marks the execution as failed at `at`
    ///
    /// Valid from `New` as well, for runs that abort before any step.
    pub fn fail(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.advance(ExecutionStatus::Error)?;
        self.end_time = Some(at);
        Ok(())
    }

    fn advance(&mut self, next: ExecutionStatus) -> Result<(), TransitionError> {
        if self.status == next || !self.status.can_advance_to(next) {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
