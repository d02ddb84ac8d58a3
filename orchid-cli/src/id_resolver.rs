//! ID resolver module
//!
//! Resolves execution id prefixes to full ids by listing executions, so users
//! can type the first few characters of an id instead of the whole UUID.

use anyhow::{Context, Result, anyhow};
use orchid_core::domain::execution::Execution;
use orchid_engine::Dispatcher;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve an execution ID or prefix to a full UUID
///
/// Full ids are returned as is, without checking that they exist.
///
/// # Errors
/// Returns an error if:
/// - The input is empty
/// - No execution matches the prefix
/// - Multiple executions match the prefix (ambiguous)
/// - Listing executions fails
pub async fn resolve_execution_id(dispatcher: &Dispatcher, input: &str) -> Result<Uuid> {
    let id_or_prefix =
        IdOrPrefix::parse(input).ok_or_else(|| anyhow!("Execution ID cannot be empty"))?;
    if let IdOrPrefix::Full(uuid) = id_or_prefix {
        return Ok(uuid);
    }

    let executions = dispatcher
        .list_executions()
        .await
        .context("Failed to fetch executions for ID resolution")?;

    find_unique(&executions, &id_or_prefix)
}

fn find_unique(executions: &[Execution], id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    let matches: Vec<_> = executions
        .iter()
        .filter(|e| id_or_prefix.matches(e.id))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!(
            "No execution found with ID starting with '{}'",
            id_or_prefix
        )),
        [execution] => Ok(execution.id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|e| e.id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple executions: {}",
                id_or_prefix,
                ids.join(", ")
            ))
        }
    }
}
