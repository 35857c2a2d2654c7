// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side counterpart to `cc_bridge_core::pipe`: the bridge writes the
//! input pipe and reads the output pipe; in here we hold the opposite end
//! of both. Same non-blocking-open-and-poll idiom, reversed roles.

use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{read, write};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;

/// Wait for a writer to open `path`, then read until it closes (EOF) and
/// return the first non-empty line seen. Returns `Ok(None)` if `cancel`
/// fires while waiting, or if the writer closed without sending anything.
pub async fn read_line(path: &Path, cancel: &CancellationToken) -> anyhow::Result<Option<String>> {
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let fd = match open(path, OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty()) {
            Ok(fd) => fd,
            Err(Errno::ENXIO) | Err(Errno::ENOENT) => {
                sleep(POLL_INTERVAL).await;
                continue;
            }
            Err(e) => anyhow::bail!("failed to open input pipe: {e}"),
        };

        let mut buffer = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match read(&fd, &mut chunk) {
                Ok(0) => break,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(Errno::EWOULDBLOCK) => sleep(POLL_INTERVAL).await,
                Err(e) => {
                    warn!(error = %e, "failed to read from input pipe");
                    anyhow::bail!("failed to read from input pipe: {e}");
                }
            }
        }
        drop(fd);

        let line = String::from_utf8_lossy(&buffer).trim().to_owned();
        if !line.is_empty() {
            return Ok(Some(line));
        }
        // Writer opened and closed without sending a line; wait for the
        // next one rather than returning a spurious empty response.
    }
}

/// Wait for a reader to attach to `path`, write `data`, then close —
/// signalling EOF to whichever side is draining `read_response` on the
/// other end.
pub async fn write_and_close(path: &Path, data: &[u8], cancel: &CancellationToken) -> anyhow::Result<bool> {
    loop {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        match open(path, OFlag::O_WRONLY | OFlag::O_NONBLOCK, Mode::empty()) {
            Ok(fd) => {
                write(&fd, data).map_err(|e| anyhow::anyhow!("failed to write to output pipe: {e}"))?;
                return Ok(true);
            }
            Err(Errno::ENXIO) | Err(Errno::ENOENT) => sleep(POLL_INTERVAL).await,
            Err(e) => anyhow::bail!("failed to open output pipe: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::stat::Mode as NixMode;
    use nix::unistd::mkfifo;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_and_close_then_read_line_round_trips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test.fifo");
        mkfifo(&path, NixMode::from_bits_truncate(0o660)).expect("mkfifo");

        let cancel = CancellationToken::new();
        let reader_path = path.clone();
        let reader_cancel = cancel.clone();
        let reader = tokio::spawn(async move { read_line(&reader_path, &reader_cancel).await });

        write_and_close(&path, b"hello\n", &cancel).await.expect("write").then_some(()).expect("reader attached");

        let line = reader.await.expect("join").expect("read_line ok");
        assert_eq!(line, Some("hello".to_owned()));
    }

    #[tokio::test]
    async fn read_line_returns_none_once_cancelled() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test.fifo");
        mkfifo(&path, NixMode::from_bits_truncate(0o660)).expect("mkfifo");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = read_line(&path, &cancel).await.expect("read_line ok");
        assert_eq!(result, None);
    }
}
