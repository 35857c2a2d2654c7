// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container variant of the instance adapter: dispatches on the
//! instance's communication mode between the FIFO daemon protocol and a
//! legacy exec-attached subprocess.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cc_bridge_core::{BridgeError, NamedPipeChannel};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::warn;

use crate::session::SessionTracker;

const EXEC_READ_CHUNK: usize = 1024;
const EXEC_READ_TIMEOUT: Duration = Duration::from_secs(30);
const INTERRUPT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const INTERRUPT_BYTE: u8 = 0x03;

/// A persistent exec-attached child process, abstracted so the legacy
/// transport can be exercised without an actual container engine.
#[async_trait]
pub trait ExecTransport: Send + Sync {
    async fn write_line(&self, text: &str) -> Result<(), BridgeError>;
    async fn write_raw(&self, byte: u8) -> Result<(), BridgeError>;
    async fn read_chunk(&self, timeout: Duration) -> Result<Option<String>, BridgeError>;
    async fn is_alive(&self) -> bool;
}

/// Daemon-mode container instance: talks to the in-container supervisor
/// over a named-pipe pair.
pub struct DaemonContainerAdapter {
    instance_name: String,
    channel: NamedPipeChannel,
    sessions: Arc<SessionTracker>,
    lock: Mutex<()>,
    running: Mutex<bool>,
}

impl DaemonContainerAdapter {
    pub fn new(instance_name: String, channel: NamedPipeChannel, sessions: Arc<SessionTracker>) -> Self {
        Self { instance_name, channel, sessions, lock: Mutex::new(()), running: Mutex::new(false) }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await && self.channel.pipes_exist()
    }

    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if *running {
            return true;
        }
        match self.channel.create_pipes() {
            Ok(()) => {
                *running = true;
                true
            }
            Err(err) => {
                warn!(instance = %self.instance_name, error = %err, "failed to create pipes");
                false
            }
        }
    }

    pub async fn interrupt(&self) -> bool {
        self.channel.write_raw(&[INTERRUPT_BYTE], INTERRUPT_WRITE_TIMEOUT).await.is_ok()
    }

    pub async fn clear_conversation(&self) -> bool {
        self.send_command_and_wait("/clear", Duration::from_secs(10)).await.0
    }

    pub async fn cleanup(&self) {
        self.channel.close();
        *self.running.lock().await = false;
    }

    /// Start the turn in the session tracker *before* writing to the
    /// pipe, and complete it *after* the read terminates, regardless of
    /// outcome — matches the original daemon-mode ordering exactly.
    pub async fn send_command_and_wait(&self, text: &str, timeout: Duration) -> (bool, String) {
        let _serialize = self.lock.lock().await;
        let (request_id, _session) = self.sessions.start_request(&self.instance_name, text).await;

        let result = self.channel.send_and_receive(text, timeout).await;

        match result {
            Ok(lines) => {
                let response = lines.join("\n");
                self.sessions.complete_request(&self.instance_name, &request_id, response.clone(), None).await;
                (true, response)
            }
            Err(err) => {
                let message = err.to_string();
                self.sessions
                    .complete_request(&self.instance_name, &request_id, String::new(), Some(message.clone()))
                    .await;
                (false, message)
            }
        }
    }
}

/// Legacy/exec-mode container instance: a persistent exec-attached child
/// with piped stdio, one bounded-timeout read at a time.
pub struct ExecContainerAdapter<T: ExecTransport> {
    instance_name: String,
    transport: T,
    sessions: Arc<SessionTracker>,
    lock: Mutex<()>,
}

impl<T: ExecTransport> ExecContainerAdapter<T> {
    pub fn new(instance_name: String, transport: T, sessions: Arc<SessionTracker>) -> Self {
        Self { instance_name, transport, sessions, lock: Mutex::new(()) }
    }

    pub async fn is_running(&self) -> bool {
        self.transport.is_alive().await
    }

    pub async fn start(&self) -> bool {
        self.transport.is_alive().await
    }

    pub async fn interrupt(&self) -> bool {
        self.transport.write_raw(INTERRUPT_BYTE).await.is_ok()
    }

    pub async fn clear_conversation(&self) -> bool {
        self.send_command_and_wait("/clear", Duration::from_secs(10)).await.0
    }

    pub async fn send_command_and_wait(&self, text: &str, timeout: Duration) -> (bool, String) {
        let _serialize = self.lock.lock().await;
        let (request_id, _session) = self.sessions.start_request(&self.instance_name, text).await;

        if let Err(err) = self.transport.write_line(text).await {
            let message = err.to_string();
            self.sessions
                .complete_request(&self.instance_name, &request_id, String::new(), Some(message.clone()))
                .await;
            return (false, message);
        }

        let mut aggregated = String::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                let error = "timed out waiting for exec response".to_owned();
                self.sessions
                    .complete_request(&self.instance_name, &request_id, aggregated.clone(), Some(error.clone()))
                    .await;
                return (false, aggregated);
            }
            match self.transport.read_chunk(EXEC_READ_TIMEOUT).await {
                Ok(Some(chunk)) => aggregated.push_str(&chunk),
                Ok(None) => break,
                Err(err) => {
                    let message = err.to_string();
                    self.sessions
                        .complete_request(&self.instance_name, &request_id, aggregated.clone(), Some(message.clone()))
                        .await;
                    return (false, aggregated);
                }
            }
        }

        self.sessions.complete_request(&self.instance_name, &request_id, aggregated.clone(), None).await;
        (true, aggregated)
    }
}

/// `ExecTransport` backed by a real `docker exec -i` child process.
pub struct DockerExecTransport {
    child: Mutex<Child>,
}

impl DockerExecTransport {
    pub async fn spawn(container_name: &str, agent_binary: &str) -> Result<Self, BridgeError> {
        let child = tokio::process::Command::new("docker")
            .args(["exec", "-i", container_name, agent_binary])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                warn!(container = container_name, error = %err, "failed to spawn docker exec");
                BridgeError::Transport
            })?;
        Ok(Self { child: Mutex::new(child) })
    }
}

#[async_trait]
impl ExecTransport for DockerExecTransport {
    async fn write_line(&self, text: &str) -> Result<(), BridgeError> {
        let mut child = self.child.lock().await;
        let stdin = child.stdin.as_mut().ok_or(BridgeError::Internal)?;
        stdin.write_all(text.as_bytes()).await.map_err(|_| BridgeError::Transport)?;
        stdin.write_all(b"\n").await.map_err(|_| BridgeError::Transport)
    }

    async fn write_raw(&self, byte: u8) -> Result<(), BridgeError> {
        let mut child = self.child.lock().await;
        let stdin = child.stdin.as_mut().ok_or(BridgeError::Internal)?;
        stdin.write_all(&[byte]).await.map_err(|_| BridgeError::Transport)
    }

    async fn read_chunk(&self, timeout: Duration) -> Result<Option<String>, BridgeError> {
        let mut child = self.child.lock().await;
        let stdout = child.stdout.as_mut().ok_or(BridgeError::Internal)?;
        let mut buf = vec![0u8; EXEC_READ_CHUNK];
        let read = tokio::time::timeout(timeout, stdout.read(&mut buf))
            .await
            .map_err(|_| BridgeError::Timeout)?
            .map_err(|_| BridgeError::Transport)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf[..read]).into_owned()))
    }

    async fn is_alive(&self) -> bool {
        self.child.lock().await.try_wait().ok().flatten().is_none()
    }
}
