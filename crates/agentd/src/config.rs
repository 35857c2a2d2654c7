// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// How the supervisor keeps the Claude Code binary running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ProcessMode {
    /// One persistent subprocess, bidirectional streaming.
    Daemon,
    /// A fresh one-shot subprocess per command line.
    Legacy,
}

/// How the host talks to this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum TransportMode {
    /// Commands/responses flow over our own stdin/stdout, attached via
    /// the container engine's exec interface.
    Stdio,
    /// Commands/responses flow over a named-pipe pair mounted into the
    /// container.
    Fifo,
}

/// Configuration for the in-container agent supervisor.
#[derive(Debug, Clone, clap::Parser)]
pub struct AgentdConfig {
    /// Path or name of the Claude Code binary to supervise.
    #[arg(long, default_value = "claude", env = "CC_BRIDGE_AGENT_BINARY")]
    pub claude_binary: String,

    /// Additional arguments forwarded to the Claude Code binary.
    #[arg(long = "claude-arg", env = "CC_BRIDGE_CLAUDE_ARGS", value_delimiter = ' ')]
    pub claude_args: Vec<String>,

    /// Process supervision strategy.
    #[arg(long, value_enum, default_value_t = ProcessMode::Daemon, env = "CC_BRIDGE_AGENT_MODE")]
    pub mode: ProcessMode,

    /// Host-facing transport.
    #[arg(long, value_enum, default_value_t = TransportMode::Stdio, env = "CC_BRIDGE_AGENT_TRANSPORT")]
    pub transport: TransportMode,

    /// Instance name; required when `--transport fifo`, used to derive the
    /// pipe pair's file names.
    #[arg(long, env = "CC_BRIDGE_INSTANCE_NAME")]
    pub instance_name: Option<String>,

    /// Directory holding the mounted FIFO pair, when `--transport fifo`.
    #[arg(long, default_value = "/tmp/cc-bridge-pipes", env = "CC_BRIDGE_PIPE_DIR")]
    pub pipe_dir: PathBuf,

    /// Restart attempts allowed within a single supervisor run before it
    /// gives up and exits. Never reset by the passage of time.
    #[arg(long, default_value_t = 5, env = "CC_BRIDGE_AGENT_MAX_RESTARTS")]
    pub max_restarts: u32,

    /// Health-check cadence, in seconds.
    #[arg(long, default_value_t = 5, env = "CC_BRIDGE_AGENT_HEALTH_CHECK_SECS")]
    pub health_check_secs: u64,

    /// Base restart backoff, in seconds (`delay = min(base * 2^attempt, cap)`).
    #[arg(long, default_value_t = 1, env = "CC_BRIDGE_AGENT_RESTART_BASE_SECS")]
    pub restart_base_secs: u64,

    /// Restart backoff cap, in seconds.
    #[arg(long, default_value_t = 30, env = "CC_BRIDGE_AGENT_RESTART_CAP_SECS")]
    pub restart_cap_secs: u64,

    /// Grace period for a SIGTERM'd child before escalating to SIGKILL, in
    /// milliseconds.
    #[arg(long, default_value_t = 500, env = "CC_BRIDGE_AGENT_SHUTDOWN_GRACE_MS")]
    pub shutdown_grace_ms: u64,

    /// In daemon mode, how long Claude's stdout must stay silent after a
    /// command was sent before the response is considered complete. Only
    /// meaningful for `--transport fifo`, which must close its output pipe
    /// to signal one finished response to the host.
    #[arg(long, default_value_t = 1_500, env = "CC_BRIDGE_AGENT_RESPONSE_IDLE_MS")]
    pub response_idle_ms: u64,

    /// Print agent status as JSON and exit immediately.
    #[arg(long)]
    pub status: bool,
}

impl AgentdConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }

    pub fn restart_base(&self) -> Duration {
        Duration::from_secs(self.restart_base_secs)
    }

    pub fn restart_cap(&self) -> Duration {
        Duration::from_secs(self.restart_cap_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn response_idle(&self) -> Duration {
        Duration::from_millis(self.response_idle_ms)
    }

    pub fn input_pipe_path(&self) -> Option<PathBuf> {
        self.instance_name.as_ref().map(|name| self.pipe_dir.join(format!("{name}.in.fifo")))
    }

    pub fn output_pipe_path(&self) -> Option<PathBuf> {
        self.instance_name.as_ref().map(|name| self.pipe_dir.join(format!("{name}.out.fifo")))
    }
}
