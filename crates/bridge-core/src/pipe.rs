// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bi-directional named pipe (FIFO) channel between the host and a
//! containerized Claude Code instance.
//!
//! Two FIFOs per instance: `<name>.in.fifo` (host writes, container reads)
//! and `<name>.out.fifo` (container writes, host reads). Framing is a
//! newline per command; a lone `0x03` byte is an interrupt signal sent
//! outside that framing.

use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{mkfifo, read, unlink, write};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::BridgeError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const FIFO_MODE: Mode = Mode::from_bits_truncate(0o660);

/// Paired named-pipe channel for one instance.
pub struct NamedPipeChannel {
    pub instance_name: String,
    pub pipe_dir: PathBuf,
    pub input_pipe_path: PathBuf,
    pub output_pipe_path: PathBuf,
}

impl NamedPipeChannel {
    pub fn new(instance_name: impl Into<String>, pipe_dir: impl Into<PathBuf>) -> Self {
        let instance_name = instance_name.into();
        let pipe_dir = pipe_dir.into();
        let input_pipe_path = pipe_dir.join(format!("{instance_name}.in.fifo"));
        let output_pipe_path = pipe_dir.join(format!("{instance_name}.out.fifo"));
        Self { instance_name, pipe_dir, input_pipe_path, output_pipe_path }
    }

    /// Create (or re-create) both FIFO files. Destructive-idempotent: any
    /// existing pipe at either path is removed first.
    pub fn create_pipes(&self) -> Result<(), BridgeError> {
        std::fs::create_dir_all(&self.pipe_dir).map_err(|e| {
            warn!(dir = %self.pipe_dir.display(), error = %e, "failed to create pipe dir");
            BridgeError::Internal
        })?;

        for path in [&self.input_pipe_path, &self.output_pipe_path] {
            if path.exists() {
                unlink(path.as_path()).map_err(|e| {
                    warn!(path = %path.display(), error = %e, "failed to remove stale pipe");
                    BridgeError::Internal
                })?;
            }
            mkfifo(path.as_path(), FIFO_MODE).map_err(|e| {
                warn!(path = %path.display(), error = %e, "failed to create pipe");
                BridgeError::Internal
            })?;
            debug!(path = %path.display(), "created named pipe");
        }

        info!(instance = %self.instance_name, "named pipes created");
        Ok(())
    }

    /// Write a command line to the input pipe, retrying a non-blocking open
    /// until a reader attaches or `timeout` elapses.
    pub async fn write_command(&self, text: &str, timeout: Duration) -> Result<(), BridgeError> {
        self.write_raw(format!("{text}\n").as_bytes(), timeout).await
    }

    /// Write raw bytes without newline framing — used for the `0x03`
    /// interrupt signal, which must never be mistaken for a command line.
    pub async fn write_raw(&self, data: &[u8], timeout: Duration) -> Result<(), BridgeError> {
        let start = Instant::now();
        loop {
            match open(&self.input_pipe_path, OFlag::O_WRONLY | OFlag::O_NONBLOCK, Mode::empty()) {
                Ok(fd) => {
                    // `fd` (an `OwnedFd`) closes itself on drop at the end of this arm.
                    write(&fd, data).map_err(|e| {
                        warn!(error = %e, "failed to write to input pipe");
                        BridgeError::Internal
                    })?;
                    debug!(bytes = data.len(), "command written to pipe");
                    return Ok(());
                }
                Err(Errno::ENXIO) => {
                    if start.elapsed() > timeout {
                        return Err(BridgeError::Timeout);
                    }
                    debug!("no reader on pipe yet, retrying");
                    sleep(POLL_INTERVAL).await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to open input pipe");
                    return Err(BridgeError::Internal);
                }
            }
        }
    }

    /// Read newline-delimited response lines until the writer closes its
    /// end (EOF) or `timeout` elapses. Decode errors are replaced, not
    /// propagated. Returns the accumulated lines joined with `\n`.
    pub async fn read_response(&self, timeout: Duration) -> Result<Vec<String>, BridgeError> {
        let start = Instant::now();
        let fd = loop {
            match open(&self.output_pipe_path, OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty()) {
                Ok(fd) => break fd,
                Err(Errno::ENXIO) => {
                    if start.elapsed() > timeout {
                        return Err(BridgeError::Timeout);
                    }
                    sleep(POLL_INTERVAL).await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to open output pipe");
                    return Err(BridgeError::Internal);
                }
            }
        };

        let mut lines = Vec::new();
        let mut buffer = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        let result: Result<(), BridgeError> = loop {
            if start.elapsed() > timeout {
                break Err(BridgeError::Timeout);
            }

            match read(&fd, &mut chunk) {
                Ok(0) => {
                    if !buffer.is_empty() {
                        lines.push(String::from_utf8_lossy(&buffer).into_owned());
                    }
                    break Ok(());
                }
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let line_str = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                        if !line_str.is_empty() {
                            lines.push(line_str);
                        }
                    }
                }
                Err(Errno::EWOULDBLOCK) => {
                    sleep(POLL_INTERVAL).await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read from output pipe");
                    break Err(BridgeError::Internal);
                }
            }
        };

        drop(fd);
        result.map(|_| lines)
    }

    /// Write a command and drain the response in one call. Not safe to call
    /// concurrently on the same channel — callers must serialize per
    /// instance (the adapter does this with a per-instance lock).
    pub async fn send_and_receive(&self, command: &str, timeout: Duration) -> Result<Vec<String>, BridgeError> {
        self.write_command(command, timeout).await?;
        self.read_response(timeout).await
    }

    /// Remove both pipe files and the directory if now empty. Best-effort:
    /// failures are logged, never propagated.
    pub fn close(&self) {
        info!(instance = %self.instance_name, "closing named pipe channel");
        for path in [&self.input_pipe_path, &self.output_pipe_path] {
            if path.exists() {
                if let Err(e) = unlink(path.as_path()) {
                    warn!(path = %path.display(), error = %e, "failed to remove pipe");
                }
            }
        }
        if let Ok(mut entries) = std::fs::read_dir(&self.pipe_dir) {
            if entries.next().is_none() {
                let _ = std::fs::remove_dir(&self.pipe_dir);
            }
        }
    }

    pub fn pipes_exist(&self) -> bool {
        self.input_pipe_path.exists() && self.output_pipe_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_pipes_then_close_removes_files() {
        let dir = tempdir().expect("tempdir");
        let channel = NamedPipeChannel::new("demo", dir.path());
        channel.create_pipes().expect("create");
        assert!(channel.pipes_exist());
        channel.close();
        assert!(!channel.pipes_exist());
    }

    #[test]
    fn create_pipes_is_destructive_idempotent() {
        let dir = tempdir().expect("tempdir");
        let channel = NamedPipeChannel::new("demo", dir.path());
        channel.create_pipes().expect("create");
        channel.create_pipes().expect("recreate");
        assert!(channel.pipes_exist());
        channel.close();
    }

    #[tokio::test]
    async fn write_command_times_out_without_reader() {
        let dir = tempdir().expect("tempdir");
        let channel = NamedPipeChannel::new("demo", dir.path());
        channel.create_pipes().expect("create");
        let result = channel.write_command("hello", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(BridgeError::Timeout)));
        channel.close();
    }
}
