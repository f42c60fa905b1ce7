//! In-memory entity repository for development and tests

use crate::entity::{document_id, Document, EntityFilter, EntityKind, EntityRepository};
use crate::error::AppError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Thread-safe entity store
#[derive(Default)]
pub struct InMemoryEntityRepository {
    entities: RwLock<HashMap<EntityKind, BTreeMap<String, Document>>>,
}

impl InMemoryEntityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityRepository for InMemoryEntityRepository {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Document>, AppError> {
        let entities = self.entities.read().await;
        Ok(entities.get(&kind).and_then(|m| m.get(id)).cloned())
    }

    async fn insert(&self, kind: EntityKind, body: Document) -> Result<(), AppError> {
        let id = document_id(&body)?.to_string();
        let mut entities = self.entities.write().await;
        let bucket = entities.entry(kind).or_default();
        if bucket.contains_key(&id) {
            return Err(AppError::Internal(format!("{} {} already exists", kind, id)));
        }
        bucket.insert(id, body);
        Ok(())
    }

    async fn update_fields(
        &self,
        kind: EntityKind,
        id: &str,
        fields: Document,
    ) -> Result<bool, AppError> {
        let mut entities = self.entities.write().await;
        match entities.get_mut(&kind).and_then(|m| m.get_mut(id)) {
            Some(body) => {
                body.extend(fields);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, AppError> {
        let mut entities = self.entities.write().await;
        Ok(entities
            .get_mut(&kind)
            .map(|m| m.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn count(&self, kind: EntityKind, filter: &EntityFilter) -> Result<usize, AppError> {
        let entities = self.entities.read().await;
        Ok(entities
            .get(&kind)
            .map(|m| m.values().filter(|b| filter.matches(b)).count())
            .unwrap_or(0))
    }

    async fn list(&self, kind: EntityKind, filter: &EntityFilter) -> Result<Vec<Document>, AppError> {
        let entities = self.entities.read().await;
        Ok(entities
            .get(&kind)
            .map(|m| m.values().filter(|b| filter.matches(b)).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(id: &str, client_type: &str) -> Document {
        json!({"id": id, "client_type": client_type, "client_port": 5000})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let repo = InMemoryEntityRepository::new();
        repo.insert(EntityKind::Connection, body("c1", "acquiring")).await.unwrap();

        let mut fields = Document::new();
        fields.insert("client_port".into(), json!(6000));
        assert!(repo.update_fields(EntityKind::Connection, "c1", fields.clone()).await.unwrap());
        assert!(!repo.update_fields(EntityKind::Connection, "missing", fields).await.unwrap());

        let stored = repo.get(EntityKind::Connection, "c1").await.unwrap().unwrap();
        assert_eq!(stored["client_port"], 6000);
        assert_eq!(stored["client_type"], "acquiring");
    }

    #[tokio::test]
    async fn test_count_and_delete_respect_kind_and_filter() {
        let repo = InMemoryEntityRepository::new();
        repo.insert(EntityKind::Connection, body("c1", "acquiring")).await.unwrap();
        repo.insert(EntityKind::Connection, body("c2", "issuing")).await.unwrap();

        let acquiring = EntityFilter::new().eq("client_type", "acquiring");
        assert_eq!(repo.count(EntityKind::Connection, &acquiring).await.unwrap(), 1);
        assert_eq!(repo.count(EntityKind::BusinessConfig, &EntityFilter::new()).await.unwrap(), 0);

        assert!(repo.delete(EntityKind::Connection, "c1").await.unwrap());
        assert!(!repo.delete(EntityKind::Connection, "c1").await.unwrap());
        assert_eq!(repo.list(EntityKind::Connection, &EntityFilter::new()).await.unwrap().len(), 1);
    }
}
