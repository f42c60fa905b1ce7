//! SwitchGate - maker-checker change control for payment-switch
//! connection definitions.
//!
//! Makers propose create/update/delete changes to governed entities, a
//! different checker approves or rejects them, and approved changes are
//! applied to the entity repository, mirrored into a git-backed version
//! store and recorded in an append-only audit trail.

pub mod audit;
pub mod auth;
pub mod change;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod models;
pub mod routes;
pub mod state;
pub mod versioning;

use crate::audit::{AuditLog, InMemoryAuditLog, PgAuditLog, SpooledAuditLog};
use crate::change::{
    ChangeControlEngine, EngineOptions, InMemoryPendingChangeStore, PendingChangeStore,
    PgPendingChangeStore,
};
use crate::config::Settings;
use crate::entity::{EntityRepository, InMemoryEntityRepository, PgEntityRepository};
use crate::error::AppError;
use crate::state::{AppState, SharedState};
use crate::versioning::{GitVersionStore, VersionStore};
use std::sync::Arc;
use tracing::{info, warn};

const DEV_JWT_SECRET: &str = "switchgate-dev-secret-change-in-production";

/// Everything the server needs, wired from settings
pub struct Application {
    pub state: SharedState,
    /// Durable audit sink, flushed periodically and at shutdown
    pub audit_spool: Arc<SpooledAuditLog>,
}

/// Build the stores and the engine described by `settings`
pub async fn build_application(settings: &Settings) -> Result<Application, AppError> {
    let pool = match &settings.database {
        Some(db_config) => {
            let pool = db::init_pool(db_config).await?;
            db::create_tables(&pool).await?;
            Some(pool)
        }
        None => {
            warn!("DATABASE_URL not set, running on in-memory stores (data is lost on restart)");
            None
        }
    };

    let entities: Arc<dyn EntityRepository> = match &pool {
        Some(pool) => Arc::new(PgEntityRepository::new(pool.clone())),
        None => Arc::new(InMemoryEntityRepository::new()),
    };
    let changes: Arc<dyn PendingChangeStore> = match &pool {
        Some(pool) => Arc::new(PgPendingChangeStore::new(pool.clone())),
        None => Arc::new(InMemoryPendingChangeStore::new()),
    };
    let audit_backend: Arc<dyn AuditLog> = match pool {
        Some(pool) => Arc::new(PgAuditLog::new(pool)),
        None => Arc::new(InMemoryAuditLog::new()),
    };

    let audit_spool = Arc::new(SpooledAuditLog::new(
        audit_backend,
        settings.audit.spool_path.clone(),
    ));
    let audit: Arc<dyn AuditLog> = audit_spool.clone();

    info!("Version store at {:?}", settings.versioning);
    let versions: Arc<dyn VersionStore> =
        Arc::new(GitVersionStore::new(settings.versioning.clone()));

    if settings.strict_apply {
        info!("Strict apply enabled: stale updates and deletes will be refused");
    }
    let engine = ChangeControlEngine::new(changes, entities.clone(), audit.clone(), versions.clone())
        .with_options(EngineOptions {
            strict_apply: settings.strict_apply,
        });

    let jwt_secret = settings.jwt_secret.clone().unwrap_or_else(|| {
        warn!("JWT_SECRET not set, using default (INSECURE - set in production!)");
        DEV_JWT_SECRET.to_string()
    });

    let state = Arc::new(AppState::new(engine, entities, audit, versions, jwt_secret));
    Ok(Application { state, audit_spool })
}
