//! Shared-secret check
//!
//! When the server has a secret configured, every protected route requires
//! the `X-Orchid-Secret` header to carry exactly that value.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use orchid_core::dto::SECRET_HEADER;

use crate::api::AppState;
use crate::api::error::ApiError;

pub async fn require_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(secret) = state.secret.as_deref() {
        let provided = request
            .headers()
            .get(SECRET_HEADER)
            .and_then(|value| value.to_str().ok());

        if provided != Some(secret) {
            tracing::warn!("Rejected {} {}: missing or wrong secret", request.method(), request.uri());
            return Err(ApiError::Unauthorized(
                "Missing or invalid secret".to_string(),
            ));
        }
    }

    Ok(next.run(request).await)
}
