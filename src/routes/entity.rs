//! Shared handlers behind the per-kind entity routes
//!
//! Writes never touch the repository directly: they are turned into
//! proposals and wait for review.

use crate::auth::Actor;
use crate::change::{PendingChange, ProposeRequest};
use crate::entity::{Document, EntityFilter, EntityKind};
use crate::error::{not_found_error, ApiResult};
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{http::StatusCode, Json};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct ProposalResponse {
    pub change: PendingChange,
}

#[derive(Debug, Serialize)]
pub struct EntityResponse {
    pub entity: Document,
}

#[derive(Debug, Serialize)]
pub struct EntityListResponse {
    pub entities: Vec<Document>,
    pub count: usize,
}

pub type ProposalReply = (StatusCode, Json<SuccessResponse<ProposalResponse>>);

fn accepted(change: PendingChange) -> ProposalReply {
    let message = format!(
        "{} of {} submitted for approval",
        change.change_type, change.entity_type
    );
    (
        StatusCode::ACCEPTED,
        Json(SuccessResponse::with_data(message, ProposalResponse { change })),
    )
}

pub async fn propose_create(
    state: &SharedState,
    actor: &Actor,
    kind: EntityKind,
    payload: Document,
) -> ApiResult<ProposalReply> {
    let change = state
        .engine
        .propose(actor, ProposeRequest::create(kind, payload))
        .await?;
    Ok(accepted(change))
}

pub async fn propose_update(
    state: &SharedState,
    actor: &Actor,
    kind: EntityKind,
    id: String,
    payload: Document,
) -> ApiResult<ProposalReply> {
    let change = state
        .engine
        .propose(actor, ProposeRequest::update(kind, id, payload))
        .await?;
    Ok(accepted(change))
}

pub async fn propose_delete(
    state: &SharedState,
    actor: &Actor,
    kind: EntityKind,
    id: String,
) -> ApiResult<ProposalReply> {
    let change = state
        .engine
        .propose(actor, ProposeRequest::delete(kind, id))
        .await?;
    Ok(accepted(change))
}

pub async fn get_one(
    state: &SharedState,
    kind: EntityKind,
    id: &str,
) -> ApiResult<Json<SuccessResponse<EntityResponse>>> {
    let entity = state
        .entities
        .get(kind, id)
        .await?
        .ok_or_else(|| not_found_error(format!("{} {} not found", kind, id)))?;

    Ok(Json(SuccessResponse::with_data(
        format!("Retrieved {} {}", kind, id),
        EntityResponse { entity },
    )))
}

pub async fn list(
    state: &SharedState,
    kind: EntityKind,
    filter: EntityFilter,
) -> ApiResult<Json<SuccessResponse<EntityListResponse>>> {
    debug!("Listing {} with filter {:?}", kind, filter.as_document());
    let entities = state.entities.list(kind, &filter).await?;
    let count = entities.len();

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} {} record(s)", count, kind),
        EntityListResponse { entities, count },
    )))
}
