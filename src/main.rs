//! SwitchGate API server
//!
//! Maker-checker governance for payment-switch connection definitions.

use std::net::SocketAddr;
use std::time::Duration;
use switchgate::build_application;
use switchgate::config::Settings;
use switchgate::routes::create_router;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting SwitchGate change control service...");

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let app = build_application(&settings).await?;
    let flusher = app
        .audit_spool
        .clone()
        .spawn_flusher(Duration::from_secs(settings.audit.flush_interval_secs));

    let router = create_router(app.state.clone(), &settings);
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("Server listening on http://{}", addr);
    info!("   POST /api/connections                  - Propose a connection");
    info!("   PUT  /api/connections/{{id}}             - Propose an update");
    info!("   DELETE /api/connections/{{id}}           - Propose a deletion");
    info!("   GET  /api/pending-changes              - Review queue");
    info!("   POST /api/pending-changes/{{id}}/review  - Approve or reject");
    info!("   GET  /api/audit-trail                  - Compliance trail");
    info!("   GET  /api/git/log                      - Snapshot history");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    flusher.abort();
    match app.audit_spool.flush().await {
        Ok(report) if report.remaining > 0 => error!(
            "{} audit record(s) remain spooled in {}",
            report.remaining,
            app.audit_spool.path().display()
        ),
        Ok(_) => {}
        Err(e) => error!("Final audit spool flush failed: {}", e),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,switchgate=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
