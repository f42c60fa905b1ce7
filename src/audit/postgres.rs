//! PostgreSQL audit trail

use crate::audit::{AuditAction, AuditLog, AuditQuery, AuditRecord};
use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use postgres_types::Json;
use serde_json::Value;
use tokio_postgres::Row;

pub struct PgAuditLog {
    pool: Pool,
}

impl PgAuditLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn from_row(row: &Row) -> Result<AuditRecord, AppError> {
    let action: String = row.get("action");
    let old_data: Option<Json<Value>> = row.get("old_data");
    let new_data: Option<Json<Value>> = row.get("new_data");
    Ok(AuditRecord {
        id: row.get("id"),
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        action: action.parse::<AuditAction>()?,
        old_data: old_data.map(|Json(v)| v),
        new_data: new_data.map(|Json(v)| v),
        user_id: row.get("user_id"),
        username: row.get("username"),
        timestamp: row.get("timestamp"),
    })
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO audit_trail
                    (id, entity_type, entity_id, action, old_data, new_data, user_id, username, timestamp)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &record.id,
                    &record.entity_type,
                    &record.entity_id,
                    &record.action.as_str(),
                    &record.old_data.as_ref().map(Json),
                    &record.new_data.as_ref().map(Json),
                    &record.user_id,
                    &record.username,
                    &record.timestamp,
                ],
            )
            .await?;
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AppError> {
        let client = self.pool.get().await?;
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows = client
            .query(
                "SELECT id, entity_type, entity_id, action, old_data, new_data, user_id, username, timestamp
                 FROM audit_trail
                 WHERE ($1::text IS NULL OR entity_type = $1)
                   AND ($2::text IS NULL OR entity_id = $2)
                 ORDER BY timestamp DESC, seq DESC
                 LIMIT $3",
                &[&query.entity_type, &query.entity_id, &limit],
            )
            .await?;

        rows.iter().map(from_row).collect()
    }
}
