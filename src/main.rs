use toolhost::{build_app, config::AppConfig, db, mcp::EchoInvoker, AppState};

use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolhost=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let addr = config.bind_addr()?;

    // Database connection
    let pool = db::create_pool(&config.database_url).await?;

    // Run migrations
    db::run_migrations(&pool).await?;

    let shutdown = CancellationToken::new();
    let state = AppState::new(pool, &config, Arc::new(EchoInvoker), shutdown.clone());

    tracing::info!(
        policy = %config.reconcile_policy,
        "Restoring tool servers from durable records..."
    );

    match state.reconciler.init_on_startup(&shutdown).await {
        Ok(report) => {
            for failure in &report.failed {
                tracing::warn!(
                    id = %failure.id,
                    version = failure.version,
                    error = %failure.error,
                    "Tool server not restored"
                );
            }
            tracing::info!(
                restored = report.restored.len(),
                failed = report.failed.len(),
                "Tool servers restored"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Startup reconciliation failed, refusing to serve");
            state.manager().shutdown_all(&CancellationToken::new()).await;
            return Err(e.into());
        }
    }

    let app = build_app(state.clone());

    // Start server
    tracing::info!("Server running on http://{}", addr);
    tracing::info!(prefix = %config.route_prefix, "Tool server endpoints mounted under prefix");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves once the process is asked to stop
///
/// Live instances are undeployed before this returns, which closes their
/// SSE streams so the server can finish draining connections.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    state.shutdown.cancel();
    state
        .manager()
        .shutdown_all(&CancellationToken::new())
        .await;
}
