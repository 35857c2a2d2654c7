// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cc-bridge-agentd: the in-container supervisor that keeps a Claude Code
//! process alive and bridges it to the host, either over exec-attached
//! stdio or a named-pipe pair.

pub mod config;
pub mod fifo;
pub mod process;
pub mod transport;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{AgentdConfig, ProcessMode, TransportMode};
use crate::process::ResponseEvent;

const CHANNEL_CAPACITY: usize = 64;

/// Run the agent supervisor until shutdown. Wires the configured
/// transport (stdio or fifo) to the configured process-supervision
/// strategy (daemon or legacy).
pub async fn run(config: AgentdConfig) -> anyhow::Result<()> {
    if config.status {
        print_status(&config);
        return Ok(());
    }

    if matches!(config.transport, TransportMode::Fifo) && config.instance_name.is_none() {
        anyhow::bail!("--instance-name is required when --transport fifo");
    }

    let shutdown = CancellationToken::new();
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel::<ResponseEvent>(CHANNEL_CAPACITY);

    let source_task = spawn_source(&config, cmd_tx, shutdown.clone())?;
    let sink_task = spawn_sink(&config, out_rx, shutdown.clone())?;

    let supervisor_shutdown = shutdown.clone();
    let supervisor = tokio::spawn({
        let config = config.clone();
        async move {
            match config.mode {
                ProcessMode::Daemon => process::run_daemon(&config, cmd_rx, out_tx, supervisor_shutdown).await,
                ProcessMode::Legacy => process::run_legacy(&config, cmd_rx, out_tx, supervisor_shutdown).await,
            }
        }
    });

    wait_for_termination(&shutdown).await;
    shutdown.cancel();

    let result = supervisor.await;
    source_task.abort();
    sink_task.abort();

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(anyhow::anyhow!("supervisor task panicked: {e}")),
    }
}

fn spawn_source(
    config: &AgentdConfig,
    cmd_tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Ok(match config.transport {
        TransportMode::Stdio => tokio::spawn(transport::stdio_source(cmd_tx, shutdown)),
        TransportMode::Fifo => {
            let path = config.input_pipe_path().ok_or_else(|| anyhow::anyhow!("missing instance name for fifo transport"))?;
            tokio::spawn(transport::fifo_source(path, cmd_tx, shutdown))
        }
    })
}

fn spawn_sink(
    config: &AgentdConfig,
    out_rx: mpsc::Receiver<ResponseEvent>,
    shutdown: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Ok(match config.transport {
        TransportMode::Stdio => tokio::spawn(transport::stdio_sink(out_rx)),
        TransportMode::Fifo => {
            let path = config.output_pipe_path().ok_or_else(|| anyhow::anyhow!("missing instance name for fifo transport"))?;
            tokio::spawn(transport::fifo_sink(path, out_rx, shutdown))
        }
    })
}

fn print_status(config: &AgentdConfig) {
    let status = serde_json::json!({
        "mode": format!("{:?}", config.mode).to_lowercase(),
        "transport": format!("{:?}", config.transport).to_lowercase(),
        "instance_name": config.instance_name,
        "claude_binary": config.claude_binary,
    });
    info!(status = %status, "agent status");
}

async fn wait_for_termination(shutdown: &CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                    _ = shutdown.cancelled() => {}
                }
            }
            _ => {
                error!("failed to install signal handlers, falling back to ctrl_c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
