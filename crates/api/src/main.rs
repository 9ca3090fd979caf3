use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use pricesync_api::config::AppConfig;
use pricesync_api::router::build_router;
use pricesync_api::services::Services;
use pricesync_api::state::AppState;
use pricesync_api::{background, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    telemetry::init(telemetry::DEFAULT_FILTER);

    // --- Configuration ---
    let config = AppConfig::from_env().context("Invalid configuration")?;
    tracing::info!(host = %config.server.host, port = %config.server.port, "Loaded server configuration");
    if config.webhook.secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET is not set, inbound events are accepted unsigned");
    }

    // --- Services ---
    let services = Services::build(&config).context("Failed to build services")?;

    // --- Background reconciliation ---
    let cancel = CancellationToken::new();
    let reconcile_handle = config.runtime.reconcile_interval.map(|period| {
        tokio::spawn(background::reconcile::run(
            Arc::clone(&services.reconciliation),
            period,
            cancel.clone(),
        ))
    });

    // --- App state ---
    let state = AppState::new(
        config.webhook.secret.clone(),
        config.feed.currency.clone(),
        Arc::new(services.dispatcher()),
    );

    // --- Router ---
    let app = build_router(
        state,
        Duration::from_secs(config.server.request_timeout_secs),
    );

    // --- Start server ---
    let host: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address {:?}", config.server.host))?;
    let addr = SocketAddr::new(host, config.server.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    if let Some(handle) = reconcile_handle {
        let _ = tokio::time::timeout(Duration::from_secs(30), handle).await;
        tracing::info!("Reconciliation job stopped");
    }

    if tokio::time::timeout(Duration::from_secs(30), services.reconciler.flush_alerts())
        .await
        .is_err()
    {
        tracing::warn!("Pending price alerts not delivered before shutdown");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
