//! Dashboard counters

use crate::change::ChangeStatus;
use crate::entity::{ClientType, ConnectionStatus, EntityFilter, EntityKind};
use crate::error::ApiResult;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_connections: usize,
    pub active_connections: usize,
    pub acquiring_count: usize,
    pub issuing_count: usize,
    pub pending_changes: usize,
    pub business_configs: usize,
}

pub async fn get_dashboard_stats(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<DashboardStats>>> {
    let connections = EntityKind::Connection;
    let count = |filter: EntityFilter| {
        let state = state.clone();
        async move { state.entities.count(connections, &filter).await }
    };

    let stats = DashboardStats {
        total_connections: count(EntityFilter::new()).await?,
        active_connections: count(EntityFilter::new().eq(
            "connection_status",
            serde_json::to_value(ConnectionStatus::Active)?,
        ))
        .await?,
        acquiring_count: count(
            EntityFilter::new().eq("client_type", serde_json::to_value(ClientType::Acquiring)?),
        )
        .await?,
        issuing_count: count(
            EntityFilter::new().eq("client_type", serde_json::to_value(ClientType::Issuing)?),
        )
        .await?,
        pending_changes: state.engine.list(Some(ChangeStatus::Pending)).await?.len(),
        business_configs: state
            .entities
            .count(EntityKind::BusinessConfig, &EntityFilter::new())
            .await?,
    };

    Ok(Json(SuccessResponse::with_data("Dashboard statistics", stats)))
}
