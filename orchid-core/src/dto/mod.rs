//! Data Transfer Objects for server/client communication
//!
//! Executions travel over the wire as-is; this module only holds the shapes
//! that have no domain counterpart.

use serde::{Deserialize, Serialize};

/// Shared-secret header checked by the server
pub const SECRET_HEADER: &str = "X-Orchid-Secret";

/// Body of every non-success JSON response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
