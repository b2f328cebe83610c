//! Serve command for running the webhook HTTP server.

use anyhow::{Context, Result};
use attend_server::AppState;
use tokio::net::TcpListener;

use crate::Config;

pub async fn run(config: &Config, listen: Option<&str>) -> Result<()> {
    let addr = listen.unwrap_or(&config.listen_addr);
    let state = AppState::initialize(&config.database_path, config.busy_timeout())
        .context("failed to open database")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    attend_server::serve(listener, state, shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
