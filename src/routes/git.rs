//! Version store route handlers
//!
//! Push and pull are explicit administrative actions and are audited.

use crate::audit::{AuditAction, AuditRecord};
use crate::auth::{require, Actor, Role};
use crate::change::ActorRef;
use crate::error::ApiResult;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use crate::versioning::{CommitLogEntry, SnapshotFile, DEFAULT_LOG_LIMIT};
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

const MAX_LOG_LIMIT: usize = 500;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub output: String,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub logs: Vec<CommitLogEntry>,
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub files: Vec<SnapshotFile>,
}

#[derive(Debug, Serialize)]
pub struct FileResponse {
    #[serde(flatten)]
    pub file: SnapshotFile,
}

pub async fn git_status(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<SuccessResponse<StatusResponse>>> {
    require(&actor, Role::can_administer, "inspect the version store")?;
    let status = state.versions.status().await?;
    Ok(Json(SuccessResponse::with_data(
        "Version store status",
        StatusResponse { status },
    )))
}

pub async fn git_push(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<SuccessResponse<SyncResponse>>> {
    require(&actor, Role::can_administer, "push the version store")?;
    let output = state.versions.push().await?;
    info!("{} pushed the version store", actor.name);
    audit_sync(&state, &actor, AuditAction::Pushed).await;

    Ok(Json(SuccessResponse::with_data(
        "Pushed to remote",
        SyncResponse { output },
    )))
}

pub async fn git_pull(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<SuccessResponse<SyncResponse>>> {
    require(&actor, Role::can_administer, "pull the version store")?;
    let output = state.versions.pull().await?;
    info!("{} pulled the version store", actor.name);
    audit_sync(&state, &actor, AuditAction::Pulled).await;

    Ok(Json(SuccessResponse::with_data(
        "Pulled from remote",
        SyncResponse { output },
    )))
}

async fn audit_sync(state: &SharedState, actor: &Actor, action: AuditAction) {
    let record = AuditRecord::new("git", "repository", action, &ActorRef::from(actor))
        .with_new(json!({ "action": action.as_str() }));
    state.engine.write_audit(record).await;
}

pub async fn git_log(
    State(state): State<SharedState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<SuccessResponse<LogResponse>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    let logs = state.versions.log(limit).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} commit(s)", logs.len()),
        LogResponse { logs },
    )))
}

pub async fn git_files(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<FilesResponse>>> {
    let files = state.versions.list().await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} snapshot(s)", files.len()),
        FilesResponse { files },
    )))
}

pub async fn git_file(
    State(state): State<SharedState>,
    Path(entity_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<FileResponse>>> {
    let file = state.versions.read(&entity_id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Snapshot {}", file.filename),
        FileResponse { file },
    )))
}
