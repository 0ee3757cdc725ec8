// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GateConfig;
use crate::state::GateState;
use crate::transport::build_router;

/// Serve the gateway until SIGINT or SIGTERM.
pub async fn run(config: GateConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(GateState::from_config(config, shutdown.clone())?);

    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %listener.local_addr()?,
        discovery_url = %state.config.discovery_url,
        "gateway listening"
    );

    spawn_signal_handler(shutdown.clone());

    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    info!(active_connections = state.active_connections(), "gateway stopped");
    Ok(())
}

/// Cancel `shutdown` on the first SIGTERM or SIGINT.
pub fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGTERM"),
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGINT"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
}
