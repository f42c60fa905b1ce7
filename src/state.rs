//! Application state management
//!
//! Shared state accessible across all handlers. Stores are built once at
//! startup and injected; nothing here is a global.

use crate::audit::AuditLog;
use crate::change::ChangeControlEngine;
use crate::entity::EntityRepository;
use crate::versioning::VersionStore;
use std::sync::Arc;

pub struct AppState {
    pub engine: ChangeControlEngine,

    /// Read side of governed entities
    pub entities: Arc<dyn EntityRepository>,

    pub audit: Arc<dyn AuditLog>,

    pub versions: Arc<dyn VersionStore>,

    /// JWT secret key for token verification
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(
        engine: ChangeControlEngine,
        entities: Arc<dyn EntityRepository>,
        audit: Arc<dyn AuditLog>,
        versions: Arc<dyn VersionStore>,
        jwt_secret: String,
    ) -> Self {
        Self {
            engine,
            entities,
            audit,
            versions,
            jwt_secret,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
