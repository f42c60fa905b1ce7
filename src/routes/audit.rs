//! Audit trail route handlers

use crate::audit::{AuditQuery, AuditRecord, DEFAULT_QUERY_LIMIT};
use crate::auth::{require, Actor, Role};
use crate::error::ApiResult;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct AuditTrailQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AuditTrailResponse {
    pub records: Vec<AuditRecord>,
    pub count: usize,
}

pub async fn get_audit_trail(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<AuditTrailQuery>,
) -> ApiResult<Json<SuccessResponse<AuditTrailResponse>>> {
    require(&actor, Role::can_view_audit, "view the audit trail")?;

    let query = AuditQuery {
        entity_type: query.entity_type.filter(|s| !s.is_empty()),
        entity_id: query.entity_id.filter(|s| !s.is_empty()),
        limit: query
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, DEFAULT_QUERY_LIMIT),
    };
    let records = state.audit.query(&query).await?;
    let count = records.len();

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} audit record(s)", count),
        AuditTrailResponse { records, count },
    )))
}
