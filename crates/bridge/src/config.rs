// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the cc-bridge webhook server.
#[derive(Debug, Clone, clap::Parser)]
pub struct BridgeConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "PORT")]
    pub port: u16,

    /// Telegram bot token from BotFather.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN")]
    pub telegram_bot_token: String,

    /// Base URL of the Telegram Bot API, without the `/bot<token>` suffix.
    /// Override to point at a local Bot API server instance.
    #[arg(long, default_value = "https://api.telegram.org", env = "TELEGRAM_API_BASE")]
    pub telegram_api_base: String,

    /// Allow-listed Telegram chat id. Messages from any other chat are
    /// silently ignored.
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: i64,

    /// Directory holding the per-instance FIFO pairs.
    #[arg(long, default_value = "/tmp/cc-bridge-pipes", env = "CC_BRIDGE_PIPE_DIR")]
    pub pipe_dir: PathBuf,

    /// Path to the instance registry JSON store.
    #[arg(long, default_value = "/tmp/cc-bridge/instances.json", env = "CC_BRIDGE_INSTANCE_STORE")]
    pub instance_store: PathBuf,

    /// Maximum webhook request body size, in bytes.
    #[arg(long, default_value_t = 10_000, env = "CC_BRIDGE_MAX_REQUEST_SIZE")]
    pub max_request_size: usize,

    /// Maximum accepted message length, in characters.
    #[arg(long, default_value_t = 4_000, env = "CC_BRIDGE_MAX_MESSAGE_LENGTH")]
    pub max_message_length: usize,

    /// Rate limit: max requests per sender within the window.
    #[arg(long, default_value_t = 10, env = "CC_BRIDGE_RATE_LIMIT_REQUESTS")]
    pub rate_limit_requests: u32,

    /// Rate limit window, in seconds.
    #[arg(long, default_value_t = 60, env = "CC_BRIDGE_RATE_LIMIT_WINDOW_SECS")]
    pub rate_limit_window_secs: u64,

    /// Deduplication cache capacity (number of update ids remembered).
    #[arg(long, default_value_t = 100, env = "CC_BRIDGE_DEDUP_CAPACITY")]
    pub dedup_capacity: usize,

    /// Deduplication entry TTL, in seconds.
    #[arg(long, default_value_t = 600, env = "CC_BRIDGE_DEDUP_TTL_SECS")]
    pub dedup_ttl_secs: u64,

    /// Graceful shutdown drain timeout, in seconds.
    #[arg(long, default_value_t = 30, env = "CC_BRIDGE_SHUTDOWN_TIMEOUT_SECS")]
    pub shutdown_timeout_secs: u64,

    /// Timeout waiting for an agent's reply, in seconds.
    #[arg(long, default_value_t = 120, env = "CC_BRIDGE_RESPONSE_TIMEOUT_SECS")]
    pub response_timeout_secs: u64,

    /// Session idle timeout, in seconds.
    #[arg(long, default_value_t = 300, env = "CC_BRIDGE_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: u64,

    /// Session request timeout (turn considered hung past this), in seconds.
    #[arg(long, default_value_t = 120, env = "CC_BRIDGE_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Maximum conversation turns retained per session.
    #[arg(long, default_value_t = 100, env = "CC_BRIDGE_MAX_HISTORY")]
    pub max_history: usize,

    /// Session-monitor sweep cadence, in seconds.
    #[arg(long, default_value_t = 30, env = "CC_BRIDGE_SESSION_MONITOR_SECS")]
    pub session_monitor_secs: u64,

    /// Inactive-session reap threshold, in seconds.
    #[arg(long, default_value_t = 3_600, env = "CC_BRIDGE_MAX_INACTIVE_SECS")]
    pub max_inactive_secs: u64,

    /// Health-monitor check cadence, in seconds.
    #[arg(long, default_value_t = 30, env = "CC_BRIDGE_HEALTH_CHECK_SECS")]
    pub health_check_secs: u64,

    /// Minimum seconds between recovery attempts for the same instance.
    #[arg(long, default_value_t = 5, env = "CC_BRIDGE_RECOVERY_DELAY_SECS")]
    pub recovery_delay_secs: u64,

    /// Consecutive failed health checks before recovery triggers.
    #[arg(long, default_value_t = 3, env = "CC_BRIDGE_MAX_CONSECUTIVE_FAILURES")]
    pub max_consecutive_failures: u32,

    /// Terminal delta-extraction: seconds between pane polls.
    #[arg(long, default_value_t = 1_000, env = "CC_BRIDGE_DELTA_POLL_MS")]
    pub delta_poll_ms: u64,

    /// Terminal delta-extraction: minimum seconds to wait before treating
    /// the pane as stable.
    #[arg(long, default_value_t = 2_000, env = "CC_BRIDGE_DELTA_MIN_WAIT_MS")]
    pub delta_min_wait_ms: u64,

    /// Terminal delta-extraction: consecutive stable polls required.
    #[arg(long, default_value_t = 3, env = "CC_BRIDGE_DELTA_STABLE_POLLS")]
    pub delta_stable_polls: u32,

    /// Terminal prompt markers checked for at the pane tail, comma-separated.
    #[arg(long, default_value = "❯,>,»", env = "CC_BRIDGE_PROMPT_MARKERS")]
    pub prompt_markers: String,

    /// Prefer terminal or container instances when both are available and
    /// equally eligible for selection.
    #[arg(long, default_value = "container", env = "CC_BRIDGE_PREFERRED_VARIANT")]
    pub preferred_variant: String,
}

impl BridgeConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.session_monitor_secs)
    }

    pub fn max_inactive(&self) -> Duration {
        Duration::from_secs(self.max_inactive_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_secs(self.recovery_delay_secs)
    }

    pub fn delta_poll_interval(&self) -> Duration {
        Duration::from_millis(self.delta_poll_ms)
    }

    pub fn delta_min_wait(&self) -> Duration {
        Duration::from_millis(self.delta_min_wait_ms)
    }

    pub fn prompt_markers(&self) -> Vec<String> {
        self.prompt_markers.split(',').map(str::to_owned).collect()
    }
}
