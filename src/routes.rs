//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod audit;
mod business_config;
mod connection;
mod dashboard;
mod entity;
mod git;
mod pending;

use crate::auth::auth_middleware;
use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    let cors = build_cors_layer(settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let middleware_stack = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes(state.clone()))
        .layer(middleware_stack)
        .with_state(state)
}

/// Authenticated API routes
fn api_routes(state: SharedState) -> Router<SharedState> {
    Router::new()
        // Connections
        .route(
            "/connections",
            get(connection::list_connections).post(connection::create_connection),
        )
        .route(
            "/connections/{id}",
            get(connection::get_connection)
                .put(connection::update_connection)
                .delete(connection::delete_connection),
        )
        // Business configuration
        .route(
            "/business-configs",
            get(business_config::list_business_configs)
                .post(business_config::create_business_config),
        )
        .route(
            "/business-configs/{id}",
            get(business_config::get_business_config)
                .put(business_config::update_business_config)
                .delete(business_config::delete_business_config),
        )
        // Review queue
        .route("/pending-changes", get(pending::list_pending_changes))
        .route("/pending-changes/{id}", get(pending::get_pending_change))
        .route("/pending-changes/{id}/review", post(pending::review_change))
        // Compliance
        .route("/audit-trail", get(audit::get_audit_trail))
        .route("/dashboard/stats", get(dashboard::get_dashboard_stats))
        // Version store
        .route("/git/status", get(git::git_status))
        .route("/git/push", post(git::git_push))
        .route("/git/pull", post(git::git_pull))
        .route("/git/log", get(git::git_log))
        .route("/git/files", get(git::git_files))
        .route("/git/file/{id}", get(git::git_file))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter(|s| s.as_str() != "*")
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
