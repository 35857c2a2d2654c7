// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host-facing command sources and response sinks: stdio (exec-attached)
//! or a named-pipe pair mounted into the container.

use std::path::PathBuf;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::fifo;
use crate::process::ResponseEvent;

/// Read command lines from our own stdin until EOF or `shutdown`, feeding
/// them to `cmd_tx`. Closing the channel on return signals the supervisor
/// to shut down.
pub async fn stdio_source(cmd_tx: mpsc::Sender<String>, shutdown: CancellationToken) {
    use tokio::io::AsyncBufReadExt;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let command = line.trim();
                        if !command.is_empty() && cmd_tx.send(command.to_owned()).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!(error = %e, "error reading stdin");
                        return;
                    }
                }
            }
        }
    }
}

/// Forward response events straight to our own stdout. Completion markers
/// carry no framing here — stdio is a continuous stream, matching how the
/// host's exec transport reads fixed-size chunks rather than whole
/// responses.
pub async fn stdio_sink(mut out_rx: mpsc::Receiver<ResponseEvent>) {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = out_rx.recv().await {
        if let ResponseEvent::Chunk(bytes) = event {
            if let Err(e) = stdout.write_all(&bytes).await {
                warn!(error = %e, "error writing to stdout");
                return;
            }
            let _ = stdout.flush().await;
        }
    }
}

/// Read command lines from the instance's input FIFO until `shutdown`,
/// reopening after each writer closes (the host opens, writes one
/// command, and closes for every call).
pub async fn fifo_source(path: PathBuf, cmd_tx: mpsc::Sender<String>, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        match fifo::read_line(&path, &shutdown).await {
            Ok(Some(command)) => {
                if cmd_tx.send(command).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "error reading input pipe");
                return;
            }
        }
    }
}

/// Buffer response chunks and, on each `Complete` marker, open the
/// output FIFO, write the buffered bytes, and close — giving the host's
/// EOF-terminated `read_response` exactly one finished reply per command.
pub async fn fifo_sink(path: PathBuf, mut out_rx: mpsc::Receiver<ResponseEvent>, shutdown: CancellationToken) {
    let mut buffer = Vec::new();
    while let Some(event) = out_rx.recv().await {
        match event {
            ResponseEvent::Chunk(bytes) => buffer.extend_from_slice(&bytes),
            ResponseEvent::Complete => {
                if !buffer.is_empty() {
                    if let Err(e) = fifo::write_and_close(&path, &buffer, &shutdown).await {
                        warn!(error = %e, "error writing to output pipe");
                    }
                    buffer.clear();
                }
            }
        }
    }
}
