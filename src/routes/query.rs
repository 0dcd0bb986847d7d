//! Governed query route handlers
//!
//! Every caller query passes through the governance engine here; there is
//! no route that reaches an endpoint around it.

use crate::error::ApiResult;
use crate::governance::{QueryOutcome, QuerySpec, Verdict};
use crate::state::SharedState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

/// Verdict for a query that was checked but not executed
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub success: bool,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Validate a query without executing it. Both verdicts are 200s here;
/// only the execution path turns a rejection into an error status.
pub async fn validate_query(
    State(state): State<SharedState>,
    Json(spec): Json<QuerySpec>,
) -> ApiResult<Json<ValidateResponse>> {
    let response = match state.governor.validate(&spec).await? {
        Verdict::Accepted(query) => ValidateResponse {
            success: true,
            accepted: true,
            code: None,
            reason: None,
            limit: Some(query.limit()),
            timeout_ms: Some(query.timeout_ms()),
        },
        Verdict::Rejected(reason) => ValidateResponse {
            success: true,
            accepted: false,
            code: Some(reason.code()),
            reason: Some(reason.to_string()),
            limit: None,
            timeout_ms: None,
        },
    };
    Ok(Json(response))
}

/// Result of an executed query
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: QueryOutcome,
}

/// Validate and execute a query
pub async fn run_query(
    State(state): State<SharedState>,
    Json(spec): Json<QuerySpec>,
) -> ApiResult<Json<QueryResponse>> {
    let outcome = state.governor.run(spec).await?;
    Ok(Json(QueryResponse {
        success: true,
        outcome,
    }))
}
