//! Business configuration route handlers

use crate::auth::Actor;
use crate::entity::{Document, EntityFilter, EntityKind};
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
pub struct BusinessConfigListQuery {
    pub config_type: Option<String>,
    /// Inactive entries are hidden unless asked for
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn create_business_config(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<Document>,
) -> ApiResult<ProposalReply> {
    entity::propose_create(&state, &actor, EntityKind::BusinessConfig, payload).await
}

pub async fn update_business_config(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(payload): Json<Document>,
) -> ApiResult<ProposalReply> {
    entity::propose_update(&state, &actor, EntityKind::BusinessConfig, id, payload).await
}

pub async fn delete_business_config(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<ProposalReply> {
    entity::propose_delete(&state, &actor, EntityKind::BusinessConfig, id).await
}

pub async fn get_business_config(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse<EntityResponse>>> {
    entity::get_one(&state, EntityKind::BusinessConfig, &id).await
}

pub async fn list_business_configs(
    State(state): State<SharedState>,
    Query(query): Query<BusinessConfigListQuery>,
) -> ApiResult<Json<SuccessResponse<EntityListResponse>>> {
    let mut filter = EntityFilter::new();
    if !query.include_inactive {
        filter = filter.eq("is_active", true);
    }
    if let Some(config_type) = query.config_type {
        filter = filter.eq("config_type", config_type);
    }
    entity::list(&state, EntityKind::BusinessConfig, filter).await
}
