//! Apply step of an approved change
//!
//! Mutates the entity repository, then mirrors the result into the version
//! store. Repository failures abort the apply; version store failures only
//! produce warnings and never roll back the mutation.

use crate::audit::{AuditAction, AuditRecord};
use crate::change::{ActorRef, ChangeControlEngine, ChangeType, PendingChange};
use crate::entity::{entity_label, Document, EntityKind};
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

/// What a successful apply produced
#[derive(Debug)]
pub(crate) struct Applied {
    pub entity_id: String,
    pub warnings: Vec<String>,
}

fn failed(reason: impl Into<String>) -> AppError {
    AppError::ApplyFailed(reason.into())
}

fn repository_failure(e: AppError) -> AppError {
    failed(format!("entity repository error: {}", e))
}

fn required_entity_id(change: &PendingChange) -> Result<&str, AppError> {
    change
        .entity_id
        .as_deref()
        .ok_or_else(|| failed(format!("{} change {} has no entity id", change.change_type, change.id)))
}

impl ChangeControlEngine {
    pub(crate) async fn apply(
        &self,
        change: &PendingChange,
        checker: &ActorRef,
        applied_at: DateTime<Utc>,
    ) -> Result<Applied, AppError> {
        match change.change_type {
            ChangeType::Create => self.apply_create(change, checker, applied_at).await,
            ChangeType::Update => self.apply_update(change, checker, applied_at).await,
            ChangeType::Delete => self.apply_delete(change, checker, applied_at).await,
        }
    }

    async fn apply_create(
        &self,
        change: &PendingChange,
        checker: &ActorRef,
        applied_at: DateTime<Utc>,
    ) -> Result<Applied, AppError> {
        let kind = change.entity_type;
        let entity_id = Uuid::new_v4().to_string();

        let mut body = change.new_payload.clone();
        body.insert("id".to_string(), Value::String(entity_id.clone()));
        body.insert("created_by".to_string(), Value::String(change.maker.id.clone()));
        body.insert("created_at".to_string(), json!(applied_at));
        body.insert("updated_at".to_string(), json!(applied_at));

        self.entities
            .insert(kind, body.clone())
            .await
            .map_err(repository_failure)?;
        info!("Created {} {} from change {}", kind, entity_id, change.id);

        let mut warnings = Vec::new();
        let message = format!("Create {} {}", kind, entity_label(kind, &body));
        self.commit_snapshot(kind, &entity_id, &body, &message, &mut warnings)
            .await;

        self.write_audit(
            AuditRecord::new(kind.as_str(), &entity_id, AuditAction::Created, checker)
                .with_new(Value::Object(body))
                .at(applied_at),
        )
        .await;

        Ok(Applied { entity_id, warnings })
    }

    async fn apply_update(
        &self,
        change: &PendingChange,
        checker: &ActorRef,
        applied_at: DateTime<Utc>,
    ) -> Result<Applied, AppError> {
        let kind = change.entity_type;
        let entity_id = required_entity_id(change)?;

        if self.options.strict_apply {
            match self.entities.get(kind, entity_id).await.map_err(repository_failure)? {
                None => return Err(failed(format!("{} {} no longer exists", kind, entity_id))),
                Some(current) if Some(&current) != change.old_snapshot.as_ref() => {
                    return Err(failed(format!(
                        "stale entity: {} {} changed since the proposal",
                        kind, entity_id
                    )));
                }
                Some(_) => {}
            }
        }

        let mut fields = change.new_payload.clone();
        fields.insert("updated_at".to_string(), json!(applied_at));

        let matched = self
            .entities
            .update_fields(kind, entity_id, fields.clone())
            .await
            .map_err(repository_failure)?;
        if !matched {
            return Err(failed(format!("{} {} no longer exists", kind, entity_id)));
        }
        info!("Updated {} {} from change {}", kind, entity_id, change.id);

        let mut warnings = Vec::new();
        match self.entities.get(kind, entity_id).await {
            Ok(Some(body)) => {
                let message = format!("Update {} {}", kind, entity_id);
                self.commit_snapshot(kind, entity_id, &body, &message, &mut warnings)
                    .await;
            }
            Ok(None) => push_warning(
                &mut warnings,
                format!("{} {} vanished before its snapshot was committed", kind, entity_id),
            ),
            Err(e) => push_warning(
                &mut warnings,
                format!("Could not read {} {} for its snapshot: {}", kind, entity_id, e),
            ),
        }

        self.write_audit(
            AuditRecord::new(kind.as_str(), entity_id, AuditAction::Updated, checker)
                .with_old(change.old_snapshot.clone().map(Value::Object))
                .with_new(Value::Object(fields))
                .at(applied_at),
        )
        .await;

        Ok(Applied {
            entity_id: entity_id.to_string(),
            warnings,
        })
    }

    async fn apply_delete(
        &self,
        change: &PendingChange,
        checker: &ActorRef,
        applied_at: DateTime<Utc>,
    ) -> Result<Applied, AppError> {
        let kind = change.entity_type;
        let entity_id = required_entity_id(change)?;

        if self.options.strict_apply {
            let current = self.entities.get(kind, entity_id).await.map_err(repository_failure)?;
            if let Some(current) = current {
                if Some(&current) != change.old_snapshot.as_ref() {
                    return Err(failed(format!(
                        "stale entity: {} {} changed since the proposal",
                        kind, entity_id
                    )));
                }
            }
        }

        let removed = self
            .entities
            .delete(kind, entity_id)
            .await
            .map_err(repository_failure)?;
        if removed {
            info!("Deleted {} {} from change {}", kind, entity_id, change.id);
        } else {
            info!("{} {} was already gone when change {} applied", kind, entity_id, change.id);
        }

        let mut warnings = Vec::new();
        let message = format!("Delete {} {}", kind, entity_id);
        if let Err(e) = self.versions.remove(entity_id, &message).await {
            push_warning(
                &mut warnings,
                format!("Version store removal failed for {} {}: {}", kind, entity_id, e),
            );
        }

        self.write_audit(
            AuditRecord::new(kind.as_str(), entity_id, AuditAction::Deleted, checker)
                .with_old(change.old_snapshot.clone().map(Value::Object))
                .at(applied_at),
        )
        .await;

        Ok(Applied {
            entity_id: entity_id.to_string(),
            warnings,
        })
    }

    async fn commit_snapshot(
        &self,
        kind: EntityKind,
        entity_id: &str,
        body: &Document,
        message: &str,
        warnings: &mut Vec<String>,
    ) {
        if let Err(e) = self.versions.commit(entity_id, body, message).await {
            push_warning(
                warnings,
                format!("Version store commit failed for {} {}: {}", kind, entity_id, e),
            );
        }
    }
}

fn push_warning(warnings: &mut Vec<String>, warning: String) {
    warn!("{}", warning);
    warnings.push(warning);
}
