//! API token guard
//!
//! When an API token is configured, every /api route requires it as a
//! bearer credential. Without one the gateway trusts its network boundary
//! and the guard waves requests through.

use crate::error::GatewayError;
use crate::state::SharedState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

/// Check the bearer token against the configured one
pub async fn require_token(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let Some(expected) = state.settings.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| GatewayError::Unauthorized("Missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| GatewayError::Unauthorized("Invalid authorization format".to_string()))?;

    if token != expected {
        return Err(GatewayError::Unauthorized("Invalid API token".to_string()));
    }

    Ok(next.run(request).await)
}
