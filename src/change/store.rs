//! Pending change storage
//!
//! The review transition is a compare-and-set on `status == pending`; a
//! blind read-then-write would let two checkers both succeed.

use crate::change::{ApplyOutcome, ChangeStatus, PendingChange, ReviewTransition};
use crate::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait PendingChangeStore: Send + Sync {
    async fn insert(&self, change: PendingChange) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<PendingChange>, AppError>;

    /// Changes newest first, optionally restricted to one status
    async fn list(&self, status: Option<ChangeStatus>) -> Result<Vec<PendingChange>, AppError>;

    /// Atomically move a pending change to its reviewed status.
    ///
    /// Fails with `NotFound` if the change is absent and `InvalidState` if it
    /// is no longer pending, including when a concurrent review won.
    async fn transition(&self, id: Uuid, review: ReviewTransition) -> Result<PendingChange, AppError>;

    /// Record what happened when an approved change was applied
    async fn record_apply_outcome(
        &self,
        id: Uuid,
        entity_id: Option<String>,
        outcome: ApplyOutcome,
    ) -> Result<PendingChange, AppError>;
}

pub(crate) fn already_reviewed(id: Uuid, status: ChangeStatus) -> AppError {
    AppError::InvalidState(format!(
        "Change {} has already been reviewed (status: {})",
        id, status
    ))
}

pub(crate) fn change_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Pending change {} not found", id))
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct InMemoryPendingChangeStore {
    changes: RwLock<HashMap<Uuid, PendingChange>>,
}

impl InMemoryPendingChangeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingChangeStore for InMemoryPendingChangeStore {
    async fn insert(&self, change: PendingChange) -> Result<(), AppError> {
        let mut changes = self.changes.write().await;
        if changes.contains_key(&change.id) {
            return Err(AppError::Internal(format!("Pending change {} already exists", change.id)));
        }
        changes.insert(change.id, change);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PendingChange>, AppError> {
        let changes = self.changes.read().await;
        Ok(changes.get(&id).cloned())
    }

    async fn list(&self, status: Option<ChangeStatus>) -> Result<Vec<PendingChange>, AppError> {
        let changes = self.changes.read().await;
        let mut list: Vec<_> = changes
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn transition(&self, id: Uuid, review: ReviewTransition) -> Result<PendingChange, AppError> {
        // check and set under one write guard
        let mut changes = self.changes.write().await;
        let change = changes.get_mut(&id).ok_or_else(|| change_not_found(id))?;
        if change.status != ChangeStatus::Pending {
            return Err(already_reviewed(id, change.status));
        }
        change.apply_review(&review);
        Ok(change.clone())
    }

    async fn record_apply_outcome(
        &self,
        id: Uuid,
        entity_id: Option<String>,
        outcome: ApplyOutcome,
    ) -> Result<PendingChange, AppError> {
        let mut changes = self.changes.write().await;
        let change = changes.get_mut(&id).ok_or_else(|| change_not_found(id))?;
        if entity_id.is_some() {
            change.entity_id = entity_id;
        }
        change.apply_outcome = Some(outcome);
        Ok(change.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ActorRef, ChangeType};
    use crate::entity::{Document, EntityKind};
    use chrono::Utc;

    fn pending() -> PendingChange {
        PendingChange::new(
            ChangeType::Create,
            EntityKind::Connection,
            None,
            None,
            Document::new(),
            ActorRef::new("u1", "alice"),
        )
    }

    fn review(status: ChangeStatus) -> ReviewTransition {
        ReviewTransition {
            status,
            checker: ActorRef::new("u2", "bob"),
            reviewed_at: Utc::now(),
            comments: Some("ok".to_string()),
        }
    }

    #[tokio::test]
    async fn test_transition_is_single_shot() {
        let store = InMemoryPendingChangeStore::new();
        let change = pending();
        let id = change.id;
        store.insert(change).await.unwrap();

        let reviewed = store.transition(id, review(ChangeStatus::Rejected)).await.unwrap();
        assert_eq!(reviewed.status, ChangeStatus::Rejected);
        assert_eq!(reviewed.checker.as_ref().unwrap().name, "bob");

        let err = store.transition(id, review(ChangeStatus::Approved)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(store.get(id).await.unwrap().unwrap().status, ChangeStatus::Rejected);
    }

    #[tokio::test]
    async fn test_transition_unknown_change() {
        let store = InMemoryPendingChangeStore::new();
        let err = store
            .transition(Uuid::new_v4(), review(ChangeStatus::Approved))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = InMemoryPendingChangeStore::new();
        let first = pending();
        let first_id = first.id;
        store.insert(first).await.unwrap();
        store.insert(pending()).await.unwrap();
        store.transition(first_id, review(ChangeStatus::Approved)).await.unwrap();

        assert_eq!(store.list(Some(ChangeStatus::Pending)).await.unwrap().len(), 1);
        assert_eq!(store.list(None).await.unwrap().len(), 2);
    }
}
