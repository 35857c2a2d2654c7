// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use cc_bridge_agentd::config::AgentdConfig;

#[tokio::main]
async fn main() {
    let config = AgentdConfig::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = cc_bridge_agentd::run(config).await {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}
