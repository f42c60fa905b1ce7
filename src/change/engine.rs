//! Change control engine
//!
//! Owns the proposal lifecycle. Makers propose, a different checker approves
//! or rejects, and an approval applies the change to the entity repository.
//! Every state change leaves exactly one audit record behind.

use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::auth::{require, Actor, Role};
use crate::change::{
    ActorRef, ApplyOutcome, ChangeStatus, ChangeType, PendingChange, PendingChangeStore,
    ProposeRequest, ReviewDecision, ReviewOutcome, ReviewRequest, ReviewTransition,
};
use crate::entity::{validate_definition, validate_patch, Document, EntityRepository};
use crate::error::AppError;
use crate::versioning::VersionStore;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Audit entity type of pending change records
pub const PENDING_CHANGE_ENTITY: &str = "pending_change";

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Fail update/delete applies whose entity changed since the proposal
    pub strict_apply: bool,
}

pub struct ChangeControlEngine {
    pub(crate) changes: Arc<dyn PendingChangeStore>,
    pub(crate) entities: Arc<dyn EntityRepository>,
    pub(crate) audit: Arc<dyn AuditLog>,
    pub(crate) versions: Arc<dyn VersionStore>,
    pub(crate) options: EngineOptions,
}

impl ChangeControlEngine {
    pub fn new(
        changes: Arc<dyn PendingChangeStore>,
        entities: Arc<dyn EntityRepository>,
        audit: Arc<dyn AuditLog>,
        versions: Arc<dyn VersionStore>,
    ) -> Self {
        Self {
            changes,
            entities,
            audit,
            versions,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Record a proposed change as pending
    pub async fn propose(
        &self,
        maker: &Actor,
        request: ProposeRequest,
    ) -> Result<PendingChange, AppError> {
        require(maker, Role::can_propose, "propose changes")?;

        let kind = request.entity_type;
        let (entity_id, old_snapshot, payload) = match request.change_type {
            ChangeType::Create => {
                if request.entity_id.is_some() {
                    return Err(AppError::Validation(
                        "A create proposal must not carry an entity id".to_string(),
                    ));
                }
                (None, None, validate_definition(kind, &request.new_payload)?)
            }
            ChangeType::Update => {
                let id = entity_id_of(&request)?;
                let payload = validate_patch(kind, &request.new_payload)?;
                let current = self.current_entity(&request, &id).await?;
                (Some(id), Some(current), payload)
            }
            ChangeType::Delete => {
                let id = entity_id_of(&request)?;
                let current = self.current_entity(&request, &id).await?;
                (Some(id), Some(current), Document::new())
            }
        };

        let change = PendingChange::new(
            request.change_type,
            kind,
            entity_id,
            old_snapshot,
            payload,
            ActorRef::from(maker),
        );
        self.changes.insert(change.clone()).await?;

        info!(
            "{} proposed {} of {} (change {})",
            maker.name, change.change_type, kind, change.id
        );

        self.write_audit(
            AuditRecord::new(
                PENDING_CHANGE_ENTITY,
                change.id.to_string(),
                AuditAction::Proposed,
                &change.maker,
            )
            .with_new(Value::Object(change.new_payload.clone()))
            .at(change.created_at),
        )
        .await;

        Ok(change)
    }

    /// Approve or reject a pending change, applying it on approval
    pub async fn review(
        &self,
        checker: &Actor,
        change_id: Uuid,
        request: ReviewRequest,
    ) -> Result<ReviewOutcome, AppError> {
        require(checker, Role::can_review, "review changes")?;

        let existing = self.get(change_id).await?;
        if existing.status != ChangeStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "Change {} has already been reviewed (status: {})",
                change_id, existing.status
            )));
        }
        if existing.maker.id == checker.id {
            return Err(AppError::PermissionDenied(
                "A change cannot be reviewed by its maker".to_string(),
            ));
        }

        let reviewer = ActorRef::from(checker);
        let transition = ReviewTransition {
            status: request.decision.into(),
            checker: reviewer.clone(),
            reviewed_at: Utc::now(),
            comments: request.comments,
        };
        let reviewed_at = transition.reviewed_at;
        let mut change = self.changes.transition(change_id, transition).await?;
        info!("{} {} change {}", checker.name, change.status, change.id);

        let mut warnings = Vec::new();
        if request.decision == ReviewDecision::Approved {
            match self.apply(&change, &reviewer, after(reviewed_at)).await {
                Ok(applied) => {
                    warnings = applied.warnings;
                    match self
                        .changes
                        .record_apply_outcome(change_id, Some(applied.entity_id.clone()), ApplyOutcome::Applied)
                        .await
                    {
                        Ok(updated) => change = updated,
                        Err(e) => {
                            error!("Could not record apply outcome of {}: {}", change_id, e);
                            change.entity_id = Some(applied.entity_id);
                            change.apply_outcome = Some(ApplyOutcome::Applied);
                        }
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    error!("Change {} approved but not applied: {}", change_id, reason);
                    if let Err(store_err) = self
                        .changes
                        .record_apply_outcome(
                            change_id,
                            None,
                            ApplyOutcome::Failed {
                                reason: reason.clone(),
                            },
                        )
                        .await
                    {
                        error!("Could not record apply failure of {}: {}", change_id, store_err);
                    }
                    self.write_audit(
                        review_record(&change, &reviewer, reviewed_at)
                            .with_new(json!({ "status": change.status, "apply_error": reason })),
                    )
                    .await;
                    return Err(e);
                }
            }
        }

        self.write_audit(
            review_record(&change, &reviewer, reviewed_at)
                .with_new(json!({ "status": change.status, "comments": change.comments })),
        )
        .await;

        Ok(ReviewOutcome { change, warnings })
    }

    pub async fn get(&self, change_id: Uuid) -> Result<PendingChange, AppError> {
        self.changes
            .get(change_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Pending change {} not found", change_id)))
    }

    /// Changes newest first
    pub async fn list(&self, status: Option<ChangeStatus>) -> Result<Vec<PendingChange>, AppError> {
        self.changes.list(status).await
    }

    async fn current_entity(&self, request: &ProposeRequest, id: &str) -> Result<Document, AppError> {
        self.entities
            .get(request.entity_type, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", request.entity_type, id)))
    }

    /// Audit failures are logged and never fail the operation; the configured
    /// sink is expected to spool what it cannot deliver.
    pub(crate) async fn write_audit(&self, record: AuditRecord) {
        let (action, entity_id) = (record.action, record.entity_id.clone());
        if let Err(e) = self.audit.record(record).await {
            error!(
                "Failed to write {} audit record for {}: {}",
                action.as_str(),
                entity_id,
                e
            );
        }
    }
}

fn entity_id_of(request: &ProposeRequest) -> Result<String, AppError> {
    match request.entity_id.as_deref() {
        Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
        _ => Err(AppError::Validation(format!(
            "Entity id is required for {} proposals",
            request.change_type
        ))),
    }
}

fn review_record(change: &PendingChange, reviewer: &ActorRef, reviewed_at: DateTime<Utc>) -> AuditRecord {
    let action = match change.status {
        ChangeStatus::Rejected => AuditAction::Rejected,
        _ => AuditAction::Approved,
    };
    AuditRecord::new(PENDING_CHANGE_ENTITY, change.id.to_string(), action, reviewer)
        .with_old(json!({ "status": ChangeStatus::Pending }))
        .at(reviewed_at)
}

/// Apply records must sort after the review record, even at microsecond precision
fn after(reviewed_at: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(reviewed_at + Duration::microseconds(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditQuery, InMemoryAuditLog};
    use crate::change::InMemoryPendingChangeStore;
    use crate::entity::{EntityFilter, EntityKind, InMemoryEntityRepository};
    use crate::versioning::InMemoryVersionStore;
    use pretty_assertions::assert_eq;

    struct Harness {
        engine: ChangeControlEngine,
        entities: Arc<InMemoryEntityRepository>,
        audit: Arc<InMemoryAuditLog>,
        versions: Arc<InMemoryVersionStore>,
    }

    fn harness_with(options: EngineOptions) -> Harness {
        let entities = Arc::new(InMemoryEntityRepository::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let versions = Arc::new(InMemoryVersionStore::new());
        let engine = ChangeControlEngine::new(
            Arc::new(InMemoryPendingChangeStore::new()),
            entities.clone(),
            audit.clone(),
            versions.clone(),
        )
        .with_options(options);
        Harness {
            engine,
            entities,
            audit,
            versions,
        }
    }

    fn harness() -> Harness {
        harness_with(EngineOptions::default())
    }

    fn alice() -> Actor {
        Actor::new("u-alice", "alice", Role::Maker)
    }

    fn bob() -> Actor {
        Actor::new("u-bob", "bob", Role::Checker)
    }

    fn config_payload(key: &str) -> Document {
        json!({
            "config_type": "routing",
            "key": key,
            "value": {"bin": "411111"},
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn approve() -> ReviewRequest {
        ReviewRequest {
            decision: ReviewDecision::Approved,
            comments: Some("looks good".to_string()),
        }
    }

    fn reject() -> ReviewRequest {
        ReviewRequest {
            decision: ReviewDecision::Rejected,
            comments: Some("wrong key".to_string()),
        }
    }

    /// Propose and approve a business config, returning its entity id
    async fn create_config(h: &Harness, key: &str) -> String {
        let change = h
            .engine
            .propose(&alice(), ProposeRequest::create(EntityKind::BusinessConfig, config_payload(key)))
            .await
            .unwrap();
        let outcome = h.engine.review(&bob(), change.id, approve()).await.unwrap();
        outcome.change.entity_id.unwrap()
    }

    #[tokio::test]
    async fn test_propose_is_pending_and_audited() {
        let h = harness();
        let change = h
            .engine
            .propose(&alice(), ProposeRequest::create(EntityKind::BusinessConfig, config_payload("k1")))
            .await
            .unwrap();

        assert_eq!(change.status, ChangeStatus::Pending);
        assert!(change.reviewed_at.is_none());
        assert!(change.checker.is_none());
        assert_eq!(change.new_payload["is_active"], json!(true));

        let records = h.audit.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::Proposed);
        assert_eq!(records[0].entity_type, PENDING_CHANGE_ENTITY);
        assert_eq!(records[0].entity_id, change.id.to_string());
    }

    #[tokio::test]
    async fn test_checker_cannot_propose() {
        let h = harness();
        let err = h
            .engine
            .propose(&bob(), ProposeRequest::create(EntityKind::BusinessConfig, config_payload("k1")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
        assert!(h.audit.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_propose_rejects_invalid_payloads() {
        let h = harness();
        let mut bad = config_payload("k1");
        bad.insert("unexpected".to_string(), json!(1));
        let err = h
            .engine
            .propose(&alice(), ProposeRequest::create(EntityKind::BusinessConfig, bad))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut with_id = ProposeRequest::create(EntityKind::BusinessConfig, config_payload("k1"));
        with_id.entity_id = Some("x".to_string());
        let err = h.engine.propose(&alice(), with_id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_and_delete_require_existing_entity() {
        let h = harness();
        let err = h
            .engine
            .propose(
                &alice(),
                ProposeRequest::update(EntityKind::BusinessConfig, "missing", config_payload("k")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let mut no_id = ProposeRequest::delete(EntityKind::BusinessConfig, "x");
        no_id.entity_id = None;
        let err = h.engine.propose(&alice(), no_id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_approved_create_applies_entity() {
        let h = harness();
        let entity_id = create_config(&h, "k1").await;

        let body = h
            .entities
            .get(EntityKind::BusinessConfig, &entity_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body["created_by"], json!("u-alice"));
        assert_eq!(body["key"], json!("k1"));
        assert!(body.contains_key("created_at"));

        let snapshot = h.versions.read(&entity_id).await.unwrap();
        assert_eq!(snapshot.content["key"], json!("k1"));
        assert_eq!(h.versions.log(10).await.unwrap()[0].message, "Create business_config k1");
    }

    #[tokio::test]
    async fn test_rejection_leaves_repository_untouched() {
        let h = harness();
        let change = h
            .engine
            .propose(&alice(), ProposeRequest::create(EntityKind::BusinessConfig, config_payload("k1")))
            .await
            .unwrap();
        let outcome = h.engine.review(&bob(), change.id, reject()).await.unwrap();

        assert_eq!(outcome.change.status, ChangeStatus::Rejected);
        assert_eq!(outcome.change.comments.as_deref(), Some("wrong key"));
        assert!(outcome.change.apply_outcome.is_none());
        let count = h
            .entities
            .count(EntityKind::BusinessConfig, &EntityFilter::new())
            .await
            .unwrap();
        assert_eq!(count, 0);

        let actions: Vec<_> = h.audit.snapshot().await.iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![AuditAction::Proposed, AuditAction::Rejected]);
    }

    #[tokio::test]
    async fn test_maker_cannot_review_own_change() {
        let h = harness();
        let admin = Actor::new("u-root", "root", Role::Admin);
        let change = h
            .engine
            .propose(&admin, ProposeRequest::create(EntityKind::BusinessConfig, config_payload("k1")))
            .await
            .unwrap();

        let err = h.engine.review(&admin, change.id, approve()).await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
        assert_eq!(h.engine.get(change.id).await.unwrap().status, ChangeStatus::Pending);

        let err = h.engine.review(&alice(), change.id, approve()).await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_second_review_is_invalid_state() {
        let h = harness();
        let change = h
            .engine
            .propose(&alice(), ProposeRequest::create(EntityKind::BusinessConfig, config_payload("k1")))
            .await
            .unwrap();
        h.engine.review(&bob(), change.id, reject()).await.unwrap();

        let err = h.engine.review(&bob(), change.id, approve()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(h.engine.get(change.id).await.unwrap().status, ChangeStatus::Rejected);
    }

    #[tokio::test]
    async fn test_review_unknown_change() {
        let h = harness();
        let err = h.engine.review(&bob(), Uuid::new_v4(), approve()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_merges_fields_and_audits_old_snapshot() {
        let h = harness();
        let entity_id = create_config(&h, "k1").await;

        let patch = json!({"description": "BIN routing"}).as_object().cloned().unwrap();
        let change = h
            .engine
            .propose(&alice(), ProposeRequest::update(EntityKind::BusinessConfig, &entity_id, patch))
            .await
            .unwrap();
        assert_eq!(change.old_snapshot.as_ref().unwrap()["key"], json!("k1"));
        h.engine.review(&bob(), change.id, approve()).await.unwrap();

        let body = h
            .entities
            .get(EntityKind::BusinessConfig, &entity_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body["description"], json!("BIN routing"));
        assert_eq!(body["key"], json!("k1"));

        let history = h
            .audit
            .query(&AuditQuery::for_entity("business_config", entity_id.as_str()))
            .await
            .unwrap();
        assert_eq!(history[0].action, AuditAction::Updated);
        assert!(history[0].old_data.is_some());
        assert_eq!(history[1].action, AuditAction::Created);
    }

    #[tokio::test]
    async fn test_delete_of_vanished_entity_succeeds() {
        let h = harness();
        let entity_id = create_config(&h, "k1").await;

        let change = h
            .engine
            .propose(&alice(), ProposeRequest::delete(EntityKind::BusinessConfig, &entity_id))
            .await
            .unwrap();
        h.entities
            .delete(EntityKind::BusinessConfig, &entity_id)
            .await
            .unwrap();

        let outcome = h.engine.review(&bob(), change.id, approve()).await.unwrap();
        assert_eq!(outcome.change.apply_outcome, Some(ApplyOutcome::Applied));
        assert!(h.versions.read(&entity_id).await.is_err());
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_stale_update() {
        let h = harness_with(EngineOptions { strict_apply: true });
        let entity_id = create_config(&h, "k1").await;

        let patch = json!({"description": "first"}).as_object().cloned().unwrap();
        let change = h
            .engine
            .propose(&alice(), ProposeRequest::update(EntityKind::BusinessConfig, &entity_id, patch))
            .await
            .unwrap();

        // concurrent edit after the proposal was captured
        let drift = json!({"is_active": false}).as_object().cloned().unwrap();
        h.entities
            .update_fields(EntityKind::BusinessConfig, &entity_id, drift)
            .await
            .unwrap();

        let err = h.engine.review(&bob(), change.id, approve()).await.unwrap_err();
        assert!(matches!(err, AppError::ApplyFailed(_)));

        let stored = h.engine.get(change.id).await.unwrap();
        assert_eq!(stored.status, ChangeStatus::Approved);
        assert!(matches!(stored.apply_outcome, Some(ApplyOutcome::Failed { .. })));

        let body = h
            .entities
            .get(EntityKind::BusinessConfig, &entity_id)
            .await
            .unwrap()
            .unwrap();
        assert!(body.get("description").is_none());
    }

    #[tokio::test]
    async fn test_version_store_outage_is_a_warning() {
        let h = harness();
        h.versions.set_unavailable(true);
        let change = h
            .engine
            .propose(&alice(), ProposeRequest::create(EntityKind::BusinessConfig, config_payload("k1")))
            .await
            .unwrap();

        let outcome = h.engine.review(&bob(), change.id, approve()).await.unwrap();
        assert_eq!(outcome.change.status, ChangeStatus::Approved);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("Version store commit failed"));

        let entity_id = outcome.change.entity_id.unwrap();
        assert!(h
            .entities
            .get(EntityKind::BusinessConfig, &entity_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_version_store_outage_on_delete_is_a_warning() {
        let h = harness();
        let entity_id = create_config(&h, "k1").await;
        let change = h
            .engine
            .propose(&alice(), ProposeRequest::delete(EntityKind::BusinessConfig, &entity_id))
            .await
            .unwrap();

        h.versions.set_unavailable(true);
        let outcome = h.engine.review(&bob(), change.id, approve()).await.unwrap();
        assert_eq!(outcome.change.apply_outcome, Some(ApplyOutcome::Applied));
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("Version store removal failed"));
        assert!(h
            .entities
            .get(EntityKind::BusinessConfig, &entity_id)
            .await
            .unwrap()
            .is_none());

        let history = h
            .audit
            .query(&AuditQuery::for_entity("business_config", entity_id.as_str()))
            .await
            .unwrap();
        assert_eq!(history[0].action, AuditAction::Deleted);
    }

    /// Repository whose writes fail while `broken` is set
    struct FlakyRepository {
        inner: InMemoryEntityRepository,
        broken: std::sync::atomic::AtomicBool,
    }

    impl FlakyRepository {
        fn check(&self) -> Result<(), AppError> {
            if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(AppError::Internal("connection reset by peer".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl EntityRepository for FlakyRepository {
        async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Document>, AppError> {
            self.inner.get(kind, id).await
        }

        async fn insert(&self, kind: EntityKind, body: Document) -> Result<(), AppError> {
            self.check()?;
            self.inner.insert(kind, body).await
        }

        async fn update_fields(
            &self,
            kind: EntityKind,
            id: &str,
            fields: Document,
        ) -> Result<bool, AppError> {
            self.check()?;
            self.inner.update_fields(kind, id, fields).await
        }

        async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, AppError> {
            self.check()?;
            self.inner.delete(kind, id).await
        }

        async fn count(&self, kind: EntityKind, filter: &EntityFilter) -> Result<usize, AppError> {
            self.inner.count(kind, filter).await
        }

        async fn list(&self, kind: EntityKind, filter: &EntityFilter) -> Result<Vec<Document>, AppError> {
            self.inner.list(kind, filter).await
        }
    }

    #[tokio::test]
    async fn test_repository_failure_keeps_approval_and_records_failure() {
        let entities = Arc::new(FlakyRepository {
            inner: InMemoryEntityRepository::new(),
            broken: std::sync::atomic::AtomicBool::new(false),
        });
        let audit = Arc::new(InMemoryAuditLog::new());
        let versions = Arc::new(InMemoryVersionStore::new());
        let engine = ChangeControlEngine::new(
            Arc::new(InMemoryPendingChangeStore::new()),
            entities.clone(),
            audit.clone(),
            versions.clone(),
        );

        let change = engine
            .propose(&alice(), ProposeRequest::create(EntityKind::BusinessConfig, config_payload("k1")))
            .await
            .unwrap();
        entities.broken.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = engine.review(&bob(), change.id, approve()).await.unwrap_err();
        assert!(matches!(err, AppError::ApplyFailed(_)));

        let stored = engine.get(change.id).await.unwrap();
        assert_eq!(stored.status, ChangeStatus::Approved);
        assert!(stored.entity_id.is_none());
        match stored.apply_outcome {
            Some(ApplyOutcome::Failed { reason }) => assert!(reason.contains("connection reset")),
            other => panic!("expected a failed apply outcome, got {:?}", other),
        }

        let records = audit.snapshot().await;
        let approvals: Vec<_> = records
            .iter()
            .filter(|r| r.action == AuditAction::Approved)
            .collect();
        assert_eq!(approvals.len(), 1);
        let new_data = approvals[0].new_data.as_ref().unwrap();
        assert!(new_data["apply_error"].as_str().unwrap().contains("connection reset"));
        assert!(!records.iter().any(|r| r.action == AuditAction::Created));
        assert!(versions.log(10).await.unwrap().is_empty());

        // the change is terminal even though nothing was applied
        let again = engine.review(&bob(), change.id, approve()).await.unwrap_err();
        assert!(matches!(again, AppError::InvalidState(_)));
    }

    #[test]
    fn test_after_is_strictly_later() {
        let future = Utc::now() + Duration::seconds(5);
        assert!(after(future) > future);
    }
}
