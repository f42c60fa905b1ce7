//! Governed entities and the repository that owns their current state
//!
//! Entities are stored as JSON object bodies keyed by `(kind, id)`. The
//! repository is the only source of truth for current state; it is mutated
//! exclusively by the apply step of an approved change.

mod memory;
mod models;
mod postgres;

pub use memory::InMemoryEntityRepository;
pub use models::*;
pub use postgres::PgEntityRepository;

use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// A JSON object body
pub type Document = Map<String, Value>;

/// Kinds of entity placed under change control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Connection,
    BusinessConfig,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Connection => "connection",
            EntityKind::BusinessConfig => "business_config",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connection" => Ok(EntityKind::Connection),
            "business_config" => Ok(EntityKind::BusinessConfig),
            other => Err(AppError::Validation(format!("Unknown entity type '{}'", other))),
        }
    }
}

/// Field-equality filter over entity bodies
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    fields: Document,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn matches(&self, body: &Document) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| body.get(field) == Some(expected))
    }

    pub fn as_document(&self) -> &Document {
        &self.fields
    }
}

/// Keyed store of governed entities
#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Document>, AppError>;

    /// Insert a new entity; the body must carry its `id`
    async fn insert(&self, kind: EntityKind, body: Document) -> Result<(), AppError>;

    /// Merge `fields` into an existing body. Returns `false` if no entity matched.
    async fn update_fields(
        &self,
        kind: EntityKind,
        id: &str,
        fields: Document,
    ) -> Result<bool, AppError>;

    /// Returns `false` if the entity was already absent
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, AppError>;

    async fn count(&self, kind: EntityKind, filter: &EntityFilter) -> Result<usize, AppError>;

    async fn list(&self, kind: EntityKind, filter: &EntityFilter) -> Result<Vec<Document>, AppError>;
}

/// Extract the `id` field every stored body carries
pub fn document_id(body: &Document) -> Result<&str, AppError> {
    body.get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation("Entity body has no string id".to_string()))
}
