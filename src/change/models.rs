//! Pending change data models
//!
//! A pending change is the unit of governance: a maker's proposed mutation
//! of one entity, waiting for a checker's decision.

use crate::auth::Actor;
use crate::entity::{Document, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Create => write!(f, "create"),
            ChangeType::Update => write!(f, "update"),
            ChangeType::Delete => write!(f, "delete"),
        }
    }
}

/// Lifecycle status. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Approved => "approved",
            ChangeStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checker's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl From<ReviewDecision> for ChangeStatus {
    fn from(decision: ReviewDecision) -> Self {
        match decision {
            ReviewDecision::Approved => ChangeStatus::Approved,
            ReviewDecision::Rejected => ChangeStatus::Rejected,
        }
    }
}

/// Identity recorded on a change (maker or checker)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: String,
    pub name: String,
}

impl ActorRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl From<&Actor> for ActorRef {
    fn from(actor: &Actor) -> Self {
        Self::new(actor.id.clone(), actor.name.clone())
    }
}

/// Result of the apply step that follows an approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    /// Approved but the entity repository was not mutated
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: Uuid,
    pub change_type: ChangeType,
    pub entity_type: EntityKind,
    /// Unset for a create until it has been applied
    pub entity_id: Option<String>,
    /// Entity body when the change was proposed (update and delete only)
    pub old_snapshot: Option<Document>,
    pub new_payload: Document,
    pub status: ChangeStatus,
    pub maker: ActorRef,
    pub checker: Option<ActorRef>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    #[serde(default)]
    pub apply_outcome: Option<ApplyOutcome>,
}

impl PendingChange {
    pub fn new(
        change_type: ChangeType,
        entity_type: EntityKind,
        entity_id: Option<String>,
        old_snapshot: Option<Document>,
        new_payload: Document,
        maker: ActorRef,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            change_type,
            entity_type,
            entity_id,
            old_snapshot,
            new_payload,
            status: ChangeStatus::Pending,
            maker,
            checker: None,
            created_at: Utc::now(),
            reviewed_at: None,
            comments: None,
            apply_outcome: None,
        }
    }

    /// Apply a review in place. Callers hold the store's conditional write.
    pub(crate) fn apply_review(&mut self, review: &ReviewTransition) {
        self.status = review.status;
        self.checker = Some(review.checker.clone());
        self.reviewed_at = Some(review.reviewed_at);
        self.comments = review.comments.clone();
    }
}

/// Review metadata written atomically with the status transition
#[derive(Debug, Clone, Serialize)]
pub struct ReviewTransition {
    pub status: ChangeStatus,
    pub checker: ActorRef,
    pub reviewed_at: DateTime<Utc>,
    pub comments: Option<String>,
}

/// Input of a proposal
#[derive(Debug, Clone)]
pub struct ProposeRequest {
    pub change_type: ChangeType,
    pub entity_type: EntityKind,
    pub entity_id: Option<String>,
    pub new_payload: Document,
}

impl ProposeRequest {
    pub fn create(entity_type: EntityKind, payload: Document) -> Self {
        Self {
            change_type: ChangeType::Create,
            entity_type,
            entity_id: None,
            new_payload: payload,
        }
    }

    pub fn update(entity_type: EntityKind, entity_id: impl Into<String>, payload: Document) -> Self {
        Self {
            change_type: ChangeType::Update,
            entity_type,
            entity_id: Some(entity_id.into()),
            new_payload: payload,
        }
    }

    pub fn delete(entity_type: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Delete,
            entity_type,
            entity_id: Some(entity_id.into()),
            new_payload: Document::new(),
        }
    }
}

/// Input of a review, as submitted by the checker
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRequest {
    #[serde(alias = "status")]
    pub decision: ReviewDecision,
    #[serde(default)]
    pub comments: Option<String>,
}

/// Successful review result. Warnings carry non-fatal version store failures.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub change: PendingChange,
    pub warnings: Vec<String>,
}
