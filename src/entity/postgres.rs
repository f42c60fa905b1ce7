//! PostgreSQL entity repository
//!
//! Bodies live in one JSONB table keyed by `(entity_type, id)`.

use crate::entity::{document_id, Document, EntityFilter, EntityKind, EntityRepository};
use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use postgres_types::Json;
use serde_json::Value;

pub struct PgEntityRepository {
    pool: Pool,
}

impl PgEntityRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn into_document(Json(value): Json<Value>) -> Result<Document, AppError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Internal(format!(
            "Stored entity body is not an object: {}",
            other
        ))),
    }
}

#[async_trait]
impl EntityRepository for PgEntityRepository {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Document>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT body FROM entities WHERE entity_type = $1 AND id = $2",
                &[&kind.as_str(), &id],
            )
            .await?;

        row.map(|r| into_document(r.get(0))).transpose()
    }

    async fn insert(&self, kind: EntityKind, body: Document) -> Result<(), AppError> {
        let id = document_id(&body)?.to_string();
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO entities (entity_type, id, body) VALUES ($1, $2, $3)",
                &[&kind.as_str(), &id, &Json(Value::Object(body))],
            )
            .await?;
        Ok(())
    }

    async fn update_fields(
        &self,
        kind: EntityKind,
        id: &str,
        fields: Document,
    ) -> Result<bool, AppError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE entities SET body = body || $3::jsonb
                 WHERE entity_type = $1 AND id = $2",
                &[&kind.as_str(), &id, &Json(Value::Object(fields))],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, AppError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM entities WHERE entity_type = $1 AND id = $2",
                &[&kind.as_str(), &id],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn count(&self, kind: EntityKind, filter: &EntityFilter) -> Result<usize, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM entities WHERE entity_type = $1 AND body @> $2::jsonb",
                &[&kind.as_str(), &Json(filter.as_document())],
            )
            .await?;
        let count: i64 = row.get(0);
        Ok(count as usize)
    }

    async fn list(&self, kind: EntityKind, filter: &EntityFilter) -> Result<Vec<Document>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT body FROM entities
                 WHERE entity_type = $1 AND body @> $2::jsonb
                 ORDER BY body->>'created_at' DESC",
                &[&kind.as_str(), &Json(filter.as_document())],
            )
            .await?;

        rows.into_iter().map(|r| into_document(r.get(0))).collect()
    }
}
