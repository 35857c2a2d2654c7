// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end tests of the webhook bridge.
//!
//! Spawns the real `cc-bridge` binary as a subprocess, fronts it with a
//! mock Telegram Bot API server, and plays the container side of the
//! FIFO protocol using `cc_bridge_agentd`'s own pipe primitives — the
//! same code the real container agent uses, just driven from the test
//! rather than from a spawned `cc-bridge-agentd` process.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use cc_bridge_core::{CommunicationMode, Instance, InstanceKind, InstanceStatus};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls. Safe to call
/// multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn workspace_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest).to_path_buf()
}

/// Resolve the path to the compiled `cc-bridge` binary.
pub fn bridge_binary() -> PathBuf {
    workspace_root().join("target").join("debug").join("cc-bridge")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A stand-in Telegram Bot API: records every `sendMessage` text and
/// answers with a well-formed `Message`.
pub struct MockTelegram {
    port: u16,
    sent: Arc<Mutex<Vec<String>>>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
struct TelegramState {
    sent: Arc<Mutex<Vec<String>>>,
}

async fn send_message(State(state): State<TelegramState>, Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    if let Some(text) = body.get("text").and_then(|t| t.as_str()) {
        state.sent.lock().await.push(text.to_owned());
    }
    Json(serde_json::json!({ "ok": true, "result": { "message_id": 1 } }))
}

impl MockTelegram {
    pub async fn start() -> anyhow::Result<Self> {
        let port = free_port()?;
        let sent = Arc::new(Mutex::new(Vec::new()));
        let state = TelegramState { sent: sent.clone() };
        // `:bot_token/sendMessage` — the token segment is unused here since
        // this mock always answers the one bot it was started for.
        let router = Router::new().route("/bot{token}/sendMessage", post(send_message)).with_state(state);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        let shutdown = CancellationToken::new();
        let shutdown_signal = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).with_graceful_shutdown(async move { shutdown_signal.cancelled().await }).await;
        });
        Ok(Self { port, sent, shutdown })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub async fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

impl Drop for MockTelegram {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Builder for a running `cc-bridge` subprocess pointed at an isolated
/// temp instance store and pipe directory.
pub struct BridgeBuilder {
    chat_id: i64,
    rate_limit_requests: u32,
    rate_limit_window_secs: u64,
    response_timeout_secs: u64,
    health_check_secs: u64,
    recovery_delay_secs: u64,
    max_consecutive_failures: u32,
    shutdown_timeout_secs: u64,
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self {
            chat_id: 1001,
            rate_limit_requests: 10,
            rate_limit_window_secs: 60,
            response_timeout_secs: 5,
            health_check_secs: 30,
            recovery_delay_secs: 5,
            max_consecutive_failures: 3,
            shutdown_timeout_secs: 5,
        }
    }
}

impl BridgeBuilder {
    pub fn chat_id(mut self, chat_id: i64) -> Self {
        self.chat_id = chat_id;
        self
    }

    pub fn rate_limit(mut self, requests: u32, window_secs: u64) -> Self {
        self.rate_limit_requests = requests;
        self.rate_limit_window_secs = window_secs;
        self
    }

    pub fn response_timeout_secs(mut self, secs: u64) -> Self {
        self.response_timeout_secs = secs;
        self
    }

    pub fn shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }

    /// Spawn `cc-bridge` against `telegram`, with `instances` pre-written
    /// into its instance store before the process starts.
    pub async fn spawn(self, telegram: &MockTelegram, instances: &[Instance]) -> anyhow::Result<BridgeProcess> {
        ensure_crypto();
        let binary = bridge_binary();
        anyhow::ensure!(binary.exists(), "cc-bridge binary not found at {}; run `cargo build` first", binary.display());

        let dir = tempfile::tempdir()?;
        let pipe_dir = dir.path().join("pipes");
        let instance_store = dir.path().join("instances.json");
        write_instance_store(&instance_store, instances).await?;

        let port = free_port()?;
        let child = Command::new(&binary)
            .args([
                "--host".to_owned(),
                "127.0.0.1".to_owned(),
                "--port".to_owned(),
                port.to_string(),
                "--telegram-bot-token".to_owned(),
                "test-token".to_owned(),
                "--telegram-chat-id".to_owned(),
                self.chat_id.to_string(),
                "--telegram-api-base".to_owned(),
                telegram.base_url(),
                "--pipe-dir".to_owned(),
                pipe_dir.to_string_lossy().into_owned(),
                "--instance-store".to_owned(),
                instance_store.to_string_lossy().into_owned(),
                "--rate-limit-requests".to_owned(),
                self.rate_limit_requests.to_string(),
                "--rate-limit-window-secs".to_owned(),
                self.rate_limit_window_secs.to_string(),
                "--response-timeout-secs".to_owned(),
                self.response_timeout_secs.to_string(),
                "--health-check-secs".to_owned(),
                self.health_check_secs.to_string(),
                "--recovery-delay-secs".to_owned(),
                self.recovery_delay_secs.to_string(),
                "--max-consecutive-failures".to_owned(),
                self.max_consecutive_failures.to_string(),
                "--shutdown-timeout-secs".to_owned(),
                self.shutdown_timeout_secs.to_string(),
            ])
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let process = BridgeProcess { child, port, pipe_dir, _dir: dir };
        process.wait_healthy(Duration::from_secs(5)).await?;
        Ok(process)
    }
}

async fn write_instance_store(path: &Path, instances: &[Instance]) -> anyhow::Result<()> {
    let map: std::collections::HashMap<String, &Instance> = instances.iter().map(|i| (i.name.clone(), i)).collect();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_vec_pretty(&map)?).await?;
    Ok(())
}

/// Build a `Docker`/`Fifo` instance record ready to write into an
/// instance store, already marked `Running`.
pub fn fifo_instance(name: &str) -> Instance {
    Instance {
        name: name.to_owned(),
        kind: InstanceKind::Docker {
            container_id: "deadbeef".to_owned(),
            container_name: format!("cc-bridge-{name}"),
            image_name: "cc-bridge/agent:latest".to_owned(),
            docker_network: None,
            communication_mode: CommunicationMode::Fifo,
        },
        status: InstanceStatus::Running,
        created_at: "0".to_owned(),
        last_activity_at: None,
    }
}

pub struct BridgeProcess {
    child: Child,
    port: u16,
    pipe_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl BridgeProcess {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn pipe_dir(&self) -> &Path {
        &self.pipe_dir
    }

    async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("cc-bridge did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// POST a Telegram `Update` carrying a plain text message from the
    /// configured chat.
    pub async fn send_text(&self, update_id: i64, chat_id: i64, text: &str) -> anyhow::Result<reqwest::Response> {
        let body = serde_json::json!({
            "update_id": update_id,
            "message": { "message_id": update_id, "text": text, "from": { "id": chat_id } },
        });
        Ok(reqwest::Client::new().post(format!("{}/webhook", self.base_url())).json(&body).send().await?)
    }

    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("cc-bridge did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn send_sigterm(&self) -> anyhow::Result<()> {
        let pid = nix::unistd::Pid::from_raw(self.child.id() as i32);
        nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM)?;
        Ok(())
    }
}

impl Drop for BridgeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Play the container side of one request/response exchange on behalf
/// of a FIFO instance: read one command line, then reply with `text`.
/// Waits (by retrying opens) for the bridge to create the pipes and
/// attach, so it's safe to spawn this before the triggering webhook
/// call lands.
pub async fn respond_once(pipe_dir: &Path, instance_name: &str, text: &str) -> anyhow::Result<String> {
    let cancel = CancellationToken::new();
    let input = pipe_dir.join(format!("{instance_name}.in.fifo"));
    let output = pipe_dir.join(format!("{instance_name}.out.fifo"));

    let command = cc_bridge_agentd::fifo::read_line(&input, &cancel)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no command received"))?;
    cc_bridge_agentd::fifo::write_and_close(&output, text.as_bytes(), &cancel).await?;
    Ok(command)
}
