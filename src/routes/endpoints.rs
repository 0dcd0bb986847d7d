//! Endpoint inspection route handlers

use crate::error::ApiResult;
use crate::state::SharedState;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

/// List all registered endpoints with health and pool snapshots
pub async fn list_endpoints(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let endpoints = state.manager.list_infos().await;
    Ok(Json(json!({
        "success": true,
        "count": endpoints.len(),
        "endpoints": endpoints,
    })))
}

/// Probe one endpoint on demand and return its refreshed info
pub async fn probe_endpoint(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.manager.probe_endpoint(&name).await?;
    let info = state.manager.endpoint_info(&name).await?;
    Ok(Json(json!({
        "success": true,
        "endpoint": info,
    })))
}

/// Make sure the endpoint's metadata collections exist. Safe to call any
/// number of times from any number of callers.
pub async fn bootstrap_endpoint(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.manager.ensure_metadata_bootstrap(&name).await?;
    Ok(Json(json!({
        "success": true,
        "endpoint": name,
        "message": "Metadata collections are ready.",
    })))
}
