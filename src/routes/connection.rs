//! Connection definition route handlers

use crate::auth::Actor;
use crate::entity::{ClientType, ConnectionStatus, Document, EntityFilter, EntityKind};
use crate::error::ApiResult;
use crate::models::SuccessResponse;
use crate::routes::entity::{self, EntityListResponse, EntityResponse, ProposalReply};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ConnectionListQuery {
    pub client_type: Option<ClientType>,
    pub connection_status: Option<ConnectionStatus>,
}

/// Propose a new connection
pub async fn create_connection(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<Document>,
) -> ApiResult<ProposalReply> {
    entity::propose_create(&state, &actor, EntityKind::Connection, payload).await
}

pub async fn update_connection(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(payload): Json<Document>,
) -> ApiResult<ProposalReply> {
    entity::propose_update(&state, &actor, EntityKind::Connection, id, payload).await
}

pub async fn delete_connection(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<ProposalReply> {
    entity::propose_delete(&state, &actor, EntityKind::Connection, id).await
}

pub async fn get_connection(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse<EntityResponse>>> {
    entity::get_one(&state, EntityKind::Connection, &id).await
}

pub async fn list_connections(
    State(state): State<SharedState>,
    Query(query): Query<ConnectionListQuery>,
) -> ApiResult<Json<SuccessResponse<EntityListResponse>>> {
    let mut filter = EntityFilter::new();
    if let Some(client_type) = query.client_type {
        filter = filter.eq("client_type", serde_json::to_value(client_type)?);
    }
    if let Some(status) = query.connection_status {
        filter = filter.eq("connection_status", serde_json::to_value(status)?);
    }
    entity::list(&state, EntityKind::Connection, filter).await
}
