// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cc-bridge: a bidirectional bridge between a chat platform webhook and
//! one or more long-running Claude Code agent instances.

pub mod adapter;
pub mod config;
pub mod health;
pub mod ratelimit;
pub mod registry;
pub mod session;
pub mod state;
pub mod telegram;
pub mod webhook;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::BridgeConfig;
use crate::health::{spawn_monitor as spawn_health_monitor, HealthMonitor, HealthMonitorConfig};
use crate::ratelimit::spawn_dedup_sweeper;
use crate::session::spawn_monitor as spawn_session_monitor;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(webhook::handle_root))
        .route("/health", get(webhook::handle_health))
        .route("/webhook", post(webhook::handle_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the bridge server until shutdown.
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let shutdown_timeout = config.shutdown_timeout();
    let health_check_interval = config.health_check_interval();
    let recovery_delay = config.recovery_delay();
    let max_consecutive_failures = config.max_consecutive_failures;
    let session_monitor_interval = config.session_monitor_interval();
    let dedup_ttl = config.dedup_ttl();

    let state = AppState::new(config).await?;

    let health_monitor = HealthMonitor::new(
        HealthMonitorConfig { check_interval: health_check_interval, recovery_delay, max_consecutive_failures },
        state.clone(),
        state.sessions.clone(),
    );

    spawn_health_monitor(health_monitor, shutdown.clone());
    spawn_session_monitor(state.sessions.clone(), session_monitor_interval, shutdown.clone());
    spawn_dedup_sweeper(state.dedup.clone(), dedup_ttl, shutdown.clone());

    let router = build_router(state.clone());
    let listener = TcpListener::bind(&addr).await?;
    info!(addr, "cc-bridge listening");

    let shutdown_gate = state.shutdown.clone();
    let shutdown_signal = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_termination().await;
            shutdown_signal.cancel();
            shutdown_gate.wait_for_shutdown(shutdown_timeout).await;
        })
        .await?;

    Ok(())
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                tracing::error!("failed to install signal handlers, falling back to ctrl_c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
