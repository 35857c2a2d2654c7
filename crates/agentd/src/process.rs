// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervises the Claude Code subprocess: daemon mode keeps one process
//! alive across commands with crash recovery; legacy mode spawns a fresh
//! process per command line.

use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AgentdConfig;

/// A chunk of output from Claude, or a marker that the current response is
/// complete. `Complete` is synthetic — stdio sinks ignore it, fifo sinks
/// use it to close and reopen the output pipe.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    Chunk(Vec<u8>),
    Complete,
}

struct SpawnedClaude {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr_task: tokio::task::JoinHandle<()>,
}

async fn spawn_claude(binary: &str, args: &[String]) -> anyhow::Result<SpawnedClaude> {
    let mut command = tokio::process::Command::new(binary);
    // Safe only because the container gives this process its own
    // filesystem and network namespace.
    command.arg("--dangerously-skip-permissions");
    command.args(args);
    command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| anyhow::anyhow!("failed to spawn {binary}: {e}"))?;
    let stdin = child.stdin.take().ok_or_else(|| anyhow::anyhow!("child stdin not piped"))?;
    let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("child stdout not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow::anyhow!("child stderr not piped"))?;

    info!(pid = child.id(), binary, "claude process started");
    let stderr_task = tokio::spawn(relay_stderr(stderr));

    Ok(SpawnedClaude { child, stdin, stdout, stderr_task })
}

async fn relay_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    info!(target: "claude_stderr", "{trimmed}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "error relaying claude stderr");
                break;
            }
        }
    }
}

/// Send the child a graceful `SIGTERM`, waiting up to `grace`, then
/// escalate to `SIGKILL`. Descriptors are dropped (closed) regardless of
/// which path is taken, by virtue of `child` going out of scope.
async fn terminate(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!("claude did not exit within the grace period, killing");
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

/// Run the persistent-subprocess supervisor until `shutdown` fires or the
/// command source closes. Commands arrive on `cmd_rx`; output (and
/// synthetic completion markers, derived from a stdout idle timer) are
/// published on `out_tx`.
pub async fn run_daemon(
    config: &AgentdConfig,
    mut cmd_rx: mpsc::Receiver<String>,
    out_tx: mpsc::Sender<ResponseEvent>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut restart_count: u32 = 0;
    let mut spawned = spawn_claude(&config.claude_binary, &config.claude_args).await?;
    let mut health_ticker = interval(config.health_check_interval());
    health_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'outer: loop {
        let mut buf = [0u8; 1024];
        let mut awaiting_response = false;
        let idle_timer = sleep(config.response_idle());
        tokio::pin!(idle_timer);

        let reason: String = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    terminate(&mut spawned.child, config.shutdown_grace()).await;
                    spawned.stderr_task.abort();
                    break 'outer;
                }

                maybe_command = cmd_rx.recv() => {
                    match maybe_command {
                        Some(command) => {
                            let data = format!("{command}\n");
                            if let Err(e) = spawned.stdin.write_all(data.as_bytes()).await {
                                warn!(error = %e, "failed writing to claude stdin");
                            }
                            awaiting_response = true;
                            idle_timer.as_mut().reset(Instant::now() + config.response_idle());
                        }
                        None => {
                            info!("command source closed, shutting down");
                            terminate(&mut spawned.child, config.shutdown_grace()).await;
                            spawned.stderr_task.abort();
                            break 'outer;
                        }
                    }
                }

                read = spawned.stdout.read(&mut buf) => {
                    match read {
                        Ok(0) => break "claude stdout closed".to_owned(),
                        Ok(n) => {
                            if out_tx.send(ResponseEvent::Chunk(buf[..n].to_vec())).await.is_err() {
                                break 'outer;
                            }
                            idle_timer.as_mut().reset(Instant::now() + config.response_idle());
                        }
                        Err(e) => break format!("error reading claude stdout: {e}"),
                    }
                }

                () = &mut idle_timer, if awaiting_response => {
                    awaiting_response = false;
                    if out_tx.send(ResponseEvent::Complete).await.is_err() {
                        break 'outer;
                    }
                }

                _ = health_ticker.tick() => {
                    if let Ok(Some(status)) = spawned.child.try_wait() {
                        break format!("claude process exited: {status}");
                    }
                }
            }
        };

        warn!(reason, "claude process needs restarting");
        spawned.stderr_task.abort();
        let _ = spawned.child.kill().await;

        if restart_count >= config.max_restarts {
            error!(max_restarts = config.max_restarts, "giving up after repeated crashes");
            anyhow::bail!("claude process exceeded its restart budget");
        }

        let backoff_secs = (config.restart_base().as_secs_f64() * 2f64.powi(restart_count as i32))
            .min(config.restart_cap().as_secs_f64());
        let backoff = Duration::from_secs_f64(backoff_secs);
        restart_count += 1;
        warn!(attempt = restart_count, max = config.max_restarts, backoff_secs, "restarting claude");

        tokio::select! {
            _ = sleep(backoff) => {}
            _ = shutdown.cancelled() => break 'outer,
        }
        spawned = spawn_claude(&config.claude_binary, &config.claude_args).await?;
    }

    Ok(())
}

/// Run one-shot legacy mode: spawn a fresh Claude process per command
/// line, stream its stdout back, and wait for it to exit before accepting
/// the next line. Mirrors `claude -p <args> -c <command>` session
/// continuity from the original implementation.
pub async fn run_legacy(
    config: &AgentdConfig,
    mut cmd_rx: mpsc::Receiver<String>,
    out_tx: mpsc::Sender<ResponseEvent>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let command = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            maybe_command = cmd_rx.recv() => match maybe_command {
                Some(command) => command,
                None => return Ok(()),
            },
        };

        let mut args = vec!["-p".to_owned()];
        args.extend(config.claude_args.iter().cloned());
        args.push("-c".to_owned());
        args.push(command);

        let mut child = match tokio::process::Command::new(&config.claude_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "failed to execute claude in print mode");
                let _ = out_tx.send(ResponseEvent::Complete).await;
                continue;
            }
        };

        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(relay_stderr(stderr)));

        if let Some(mut stdout) = child.stdout.take() {
            let mut buf = [0u8; 1024];
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        let _ = child.kill().await;
                        if let Some(task) = stderr_task { task.abort(); }
                        return Ok(());
                    }
                    read = stdout.read(&mut buf) => {
                        match read {
                            Ok(0) => break,
                            Ok(n) => {
                                if out_tx.send(ResponseEvent::Chunk(buf[..n].to_vec())).await.is_err() {
                                    let _ = child.kill().await;
                                    return Ok(());
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "error reading claude stdout in print mode");
                                break;
                            }
                        }
                    }
                }
            }
        }

        let status = child.wait().await;
        if let Some(task) = stderr_task {
            task.abort();
        }
        match status {
            Ok(status) => info!(?status, "claude print-mode process finished"),
            Err(e) => warn!(error = %e, "failed waiting for claude print-mode process"),
        }
        if out_tx.send(ResponseEvent::Complete).await.is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn legacy_mode_runs_true_and_completes() {
        let config = AgentdConfig {
            claude_binary: "true".to_owned(),
            claude_args: Vec::new(),
            mode: crate::config::ProcessMode::Legacy,
            transport: crate::config::TransportMode::Stdio,
            instance_name: None,
            pipe_dir: "/tmp".into(),
            max_restarts: 5,
            health_check_secs: 5,
            restart_base_secs: 1,
            restart_cap_secs: 30,
            shutdown_grace_ms: 500,
            response_idle_ms: 200,
            status: false,
        };
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        cmd_tx.send("hello".to_owned()).await.expect("send");
        drop(cmd_tx);

        run_legacy(&config, cmd_rx, out_tx, shutdown).await.expect("run_legacy");

        let mut saw_complete = false;
        while let Some(event) = out_rx.recv().await {
            if matches!(event, ResponseEvent::Complete) {
                saw_complete = true;
            }
        }
        assert!(saw_complete);
    }
}
