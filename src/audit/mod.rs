//! Audit log
//!
//! Append-only compliance record of every state-changing action. There is no
//! update or delete operation; `record` is the only write primitive and the
//! read side returns entries newest first.

mod memory;
mod postgres;
mod spool;

pub use memory::InMemoryAuditLog;
pub use postgres::PgAuditLog;
pub use spool::{FlushReport, SpooledAuditLog};

use crate::error::AppError;
use crate::change::ActorRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Default page size for audit queries
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Proposed,
    Approved,
    Rejected,
    Created,
    Updated,
    Deleted,
    Pushed,
    Pulled,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Proposed => "proposed",
            AuditAction::Approved => "approved",
            AuditAction::Rejected => "rejected",
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Deleted => "deleted",
            AuditAction::Pushed => "pushed",
            AuditAction::Pulled => "pulled",
        }
    }
}

impl FromStr for AuditAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| AppError::Internal(format!("Unknown audit action '{}'", s)))
    }
}

/// One immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub action: AuditAction,
    #[serde(default)]
    pub old_data: Option<Value>,
    #[serde(default)]
    pub new_data: Option<Value>,
    pub user_id: String,
    pub username: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: AuditAction,
        actor: &ActorRef,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action,
            old_data: None,
            new_data: None,
            user_id: actor.id.clone(),
            username: actor.name.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_old(mut self, data: impl Into<Option<Value>>) -> Self {
        self.old_data = data.into();
        self
    }

    pub fn with_new(mut self, data: impl Into<Option<Value>>) -> Self {
        self.new_data = data.into();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Read-side filter
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            entity_type: None,
            entity_id: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl AuditQuery {
    pub fn for_entity(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.entity_type
            .as_deref()
            .map_or(true, |t| record.entity_type == t)
            && self
                .entity_id
                .as_deref()
                .map_or(true, |id| record.entity_id == id)
    }
}

/// Append-only audit sink
///
/// Implementations must treat a repeated `record` with the same id as a no-op
/// so that spooled records can be replayed.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), AppError>;

    /// Matching records, newest first
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AppError>;
}
