//! Pending change queue and review route handlers

use crate::auth::Actor;
use crate::change::{ChangeStatus, PendingChange, ReviewOutcome, ReviewRequest};
use crate::error::ApiResult;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Status filter of the queue view. `all` disables filtering.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    Pending,
    Approved,
    Rejected,
    All,
}

impl StatusFilter {
    fn as_status(self) -> Option<ChangeStatus> {
        match self {
            StatusFilter::Pending => Some(ChangeStatus::Pending),
            StatusFilter::Approved => Some(ChangeStatus::Approved),
            StatusFilter::Rejected => Some(ChangeStatus::Rejected),
            StatusFilter::All => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PendingListQuery {
    #[serde(default)]
    pub status: StatusFilter,
}

#[derive(Debug, Serialize)]
pub struct PendingListResponse {
    pub changes: Vec<PendingChange>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct PendingChangeResponse {
    pub change: PendingChange,
}

pub async fn list_pending_changes(
    State(state): State<SharedState>,
    Query(query): Query<PendingListQuery>,
) -> ApiResult<Json<SuccessResponse<PendingListResponse>>> {
    let changes = state.engine.list(query.status.as_status()).await?;
    let count = changes.len();

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} change(s)", count),
        PendingListResponse { changes, count },
    )))
}

pub async fn get_pending_change(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<PendingChangeResponse>>> {
    let change = state.engine.get(id).await?;
    Ok(Json(SuccessResponse::with_data(
        "Retrieved change",
        PendingChangeResponse { change },
    )))
}

/// Approve or reject a change
pub async fn review_change(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewRequest>,
) -> ApiResult<Json<SuccessResponse<ReviewOutcome>>> {
    let outcome = state.engine.review(&actor, id, payload).await?;

    if !outcome.warnings.is_empty() {
        info!(
            "Change {} reviewed with {} warning(s)",
            id,
            outcome.warnings.len()
        );
    }

    Ok(Json(SuccessResponse::with_data(
        format!("Change {}", outcome.change.status),
        outcome,
    )))
}
