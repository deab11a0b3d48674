//! Snapshot Server
//!
//! Captures a DOM region as PNG, or a page as PDF, over HTTP.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use snapshot_server::{router, AppState, Args, ServiceConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = ServiceConfig::try_from(args).context("invalid configuration")?;
    let listen = config.listen;

    tracing::info!(
        %listen,
        wait_until = ?config.navigation.wait_until,
        pdf_mode = ?config.render.pdf_mode,
        max_sessions = config.max_sessions,
        "Snapshot server starting"
    );
    if config.defaults.url.is_none() || config.defaults.selector.is_none() {
        tracing::info!("No default url/selector; both must be given per request");
    }

    let state = Arc::new(AppState::new(config));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot bind {listen}"))?;
    tracing::info!("Listening on http://{listen}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Snapshot server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
