// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use cc_bridge::config::BridgeConfig;

#[tokio::main]
async fn main() {
    // reqwest's rustls-no-provider build needs an explicit provider
    // installed once before the first TLS connection (Telegram's API).
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = BridgeConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = cc_bridge::run(config).await {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}
