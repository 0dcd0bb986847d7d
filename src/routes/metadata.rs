//! Field metadata route handlers

use crate::error::{validation_error, ApiResult};
use crate::metadata::{KeyPattern, MetadataRecord, RecordDraft};
use crate::state::SharedState;
use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;
use validator::Validate;

/// A stored record, tagged with the location that holds it
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResponse {
    pub success: bool,
    pub record: MetadataRecord,
}

/// Store a field description. Lands in the primary metadata database when
/// possible, in the target database's shadow collection otherwise.
pub async fn submit_record(
    State(state): State<SharedState>,
    Json(draft): Json<RecordDraft>,
) -> ApiResult<Json<RecordResponse>> {
    draft.validate()?;
    let record = state.metadata.write(draft).await?;
    Ok(Json(RecordResponse {
        success: true,
        record,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordListResponse {
    pub success: bool,
    pub count: usize,
    pub records: Vec<MetadataRecord>,
}

/// Read records by key pattern, merged across both storage locations
pub async fn list_records(
    State(state): State<SharedState>,
    Query(pattern): Query<KeyPattern>,
) -> ApiResult<Json<RecordListResponse>> {
    if pattern.endpoint.is_empty() {
        return Err(validation_error("endpoint is required"));
    }
    let records = state.metadata.read(&pattern).await?;
    Ok(Json(RecordListResponse {
        success: true,
        count: records.len(),
        records,
    }))
}
