//! Database connection management
//!
//! Builds the connection pool and creates the tables the stores rely on.

use crate::config::DatabaseConfig;
use crate::error::AppError;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

/// Create a pool and verify it can reach the server
pub async fn init_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(config.max_pool_size));

    let pool = if config.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| AppError::Config(format!("Failed to create TLS pool: {}", e)))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))?
    };

    let client = pool.get().await?;
    client.query_one("SELECT 1", &[]).await?;
    drop(client);

    info!(
        "Database pool ready ({}:{}/{}, TLS: {})",
        config.host, config.port, config.database, config.require_tls
    );
    Ok(pool)
}

/// Create tables and indexes if they don't exist
pub async fn create_tables(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS entities (
                entity_type VARCHAR(64) NOT NULL,
                id VARCHAR(128) NOT NULL,
                body JSONB NOT NULL,
                PRIMARY KEY (entity_type, id)
            )",
            &[],
        )
        .await?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS pending_changes (
                id UUID PRIMARY KEY,
                status VARCHAR(16) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                document JSONB NOT NULL
            )",
            &[],
        )
        .await?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS audit_trail (
                seq BIGSERIAL,
                id UUID PRIMARY KEY,
                entity_type VARCHAR(64) NOT NULL,
                entity_id VARCHAR(128) NOT NULL,
                action VARCHAR(32) NOT NULL,
                old_data JSONB,
                new_data JSONB,
                user_id VARCHAR(128) NOT NULL,
                username VARCHAR(255) NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL
            )",
            &[],
        )
        .await?;

    client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_pending_changes_status ON pending_changes(status, created_at DESC)",
            &[],
        )
        .await?;
    client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_trail_entity ON audit_trail(entity_type, entity_id)",
            &[],
        )
        .await?;
    client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_trail_timestamp ON audit_trail(timestamp DESC, seq DESC)",
            &[],
        )
        .await?;

    info!("Database tables initialized");
    Ok(())
}
