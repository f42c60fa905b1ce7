//! PostgreSQL pending change store
//!
//! Each change is one JSONB document. `status` and `created_at` are lifted
//! into columns so the review transition can be a conditional UPDATE.

use crate::change::store::{already_reviewed, change_not_found};
use crate::change::{ApplyOutcome, ChangeStatus, PendingChange, PendingChangeStore, ReviewTransition};
use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use postgres_types::Json;
use serde_json::{json, Value};
use uuid::Uuid;

pub struct PgPendingChangeStore {
    pool: Pool,
}

impl PgPendingChangeStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingChangeStore for PgPendingChangeStore {
    async fn insert(&self, change: PendingChange) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO pending_changes (id, status, created_at, document)
                 VALUES ($1, $2, $3, $4)",
                &[
                    &change.id,
                    &change.status.as_str(),
                    &change.created_at,
                    &Json(&change),
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PendingChange>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT document FROM pending_changes WHERE id = $1", &[&id])
            .await?;
        Ok(row.map(|r| {
            let Json(change): Json<PendingChange> = r.get("document");
            change
        }))
    }

    async fn list(&self, status: Option<ChangeStatus>) -> Result<Vec<PendingChange>, AppError> {
        let client = self.pool.get().await?;
        let status = status.map(|s| s.as_str());
        let rows = client
            .query(
                "SELECT document FROM pending_changes
                 WHERE ($1::text IS NULL OR status = $1)
                 ORDER BY created_at DESC",
                &[&status],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let Json(change): Json<PendingChange> = r.get("document");
                change
            })
            .collect())
    }

    async fn transition(&self, id: Uuid, review: ReviewTransition) -> Result<PendingChange, AppError> {
        let client = self.pool.get().await?;
        let patch = serde_json::to_value(&review)?;
        let row = client
            .query_opt(
                "UPDATE pending_changes
                 SET status = $2, document = document || $3::jsonb
                 WHERE id = $1 AND status = 'pending'
                 RETURNING document",
                &[&id, &review.status.as_str(), &Json(&patch)],
            )
            .await?;

        if let Some(row) = row {
            let Json(change): Json<PendingChange> = row.get("document");
            return Ok(change);
        }

        // lost the race or never existed
        let current = client
            .query_opt("SELECT status FROM pending_changes WHERE id = $1", &[&id])
            .await?;
        match current {
            Some(row) => {
                let status: String = row.get("status");
                let status: ChangeStatus = serde_json::from_value(Value::String(status))?;
                Err(already_reviewed(id, status))
            }
            None => Err(change_not_found(id)),
        }
    }

    async fn record_apply_outcome(
        &self,
        id: Uuid,
        entity_id: Option<String>,
        outcome: ApplyOutcome,
    ) -> Result<PendingChange, AppError> {
        let client = self.pool.get().await?;
        let mut patch = json!({ "apply_outcome": outcome });
        if let Some(entity_id) = entity_id {
            patch["entity_id"] = Value::String(entity_id);
        }
        let row = client
            .query_opt(
                "UPDATE pending_changes SET document = document || $2::jsonb
                 WHERE id = $1
                 RETURNING document",
                &[&id, &Json(&patch)],
            )
            .await?
            .ok_or_else(|| change_not_found(id))?;

        let Json(change): Json<PendingChange> = row.get("document");
        Ok(change)
    }
}
