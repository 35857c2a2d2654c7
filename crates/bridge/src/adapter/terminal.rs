// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal (tmux) variant of the instance adapter: the delta-extraction
//! protocol for pulling a response out of raw pane content.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cc_bridge_core::BridgeError;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

const BOX_DRAWING_CHARS: &str = "─═━│┌┐└┘▔▚▛▜▝▘▐▙▌";

/// Thresholds for the delta-extraction poll loop.
#[derive(Debug, Clone)]
pub struct DeltaConfig {
    pub poll_interval: Duration,
    pub min_wait: Duration,
    pub stable_polls: u32,
    pub prompt_markers: Vec<String>,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            min_wait: Duration::from_secs(2),
            stable_polls: 3,
            prompt_markers: vec!["❯".into(), ">".into(), "»".into()],
        }
    }
}

/// Access to a tmux pane, abstracted so the delta-extraction algorithm
/// can be tested without an actual tmux server.
#[async_trait]
pub trait TmuxPane: Send + Sync {
    async fn capture(&self) -> Result<String, BridgeError>;
    async fn send_text(&self, text: &str) -> Result<(), BridgeError>;
    async fn send_interrupt(&self) -> Result<(), BridgeError>;
    async fn session_exists(&self) -> bool;
}

/// `TmuxPane` backed by the real `tmux` binary.
pub struct TmuxCli {
    session: String,
}

impl TmuxCli {
    pub fn new(session: impl Into<String>) -> Self {
        Self { session: session.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, BridgeError> {
        tokio::process::Command::new("tmux")
            .args(args)
            .output()
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "failed to run tmux");
                BridgeError::Transport
            })
    }
}

#[async_trait]
impl TmuxPane for TmuxCli {
    async fn capture(&self) -> Result<String, BridgeError> {
        let output = self.run(&["capture-pane", "-p", "-t", &self.session]).await?;
        if !output.status.success() {
            return Err(BridgeError::Transport);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn send_text(&self, text: &str) -> Result<(), BridgeError> {
        let output = self.run(&["send-keys", "-t", &self.session, text, "Enter"]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(BridgeError::Transport)
        }
    }

    async fn send_interrupt(&self) -> Result<(), BridgeError> {
        let output = self.run(&["send-keys", "-t", &self.session, "C-c"]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(BridgeError::Transport)
        }
    }

    async fn session_exists(&self) -> bool {
        self.run(&["has-session", "-t", &self.session])
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

pub struct TerminalAdapter<P: TmuxPane> {
    pane: P,
    config: DeltaConfig,
    lock: Mutex<()>,
}

impl<P: TmuxPane> TerminalAdapter<P> {
    pub fn new(pane: P, config: DeltaConfig) -> Self {
        Self { pane, config, lock: Mutex::new(()) }
    }

    pub async fn is_running(&self) -> bool {
        self.pane.session_exists().await
    }

    /// Terminal sessions are created externally (by whatever spawned the
    /// tmux pane in the first place); this adapter can only observe
    /// whether one is already attached.
    pub async fn start(&self) -> bool {
        self.pane.session_exists().await
    }

    pub async fn interrupt(&self) -> bool {
        self.pane.send_interrupt().await.is_ok()
    }

    pub async fn clear_conversation(&self) -> bool {
        self.send_command_and_wait("/clear", Duration::from_secs(10)).await.0
    }

    /// Drives the delta-extraction protocol: send the command, poll the
    /// pane until the prompt re-settles, then extract the response text
    /// sandwiched between the echoed command line and the new prompt.
    pub async fn send_command_and_wait(&self, text: &str, timeout: Duration) -> (bool, String) {
        let _serialize = self.lock.lock().await;
        let start = Instant::now();

        let pre_capture = match self.pane.capture().await {
            Ok(content) => content,
            Err(_) => return (false, String::new()),
        };
        let pre_hash = hash_content(&pre_capture);

        if self.pane.send_text(text).await.is_err() {
            return (false, String::new());
        }

        let mut last_hash = pre_hash;
        let mut content_changed = false;
        let mut stability = 0u32;
        let mut latest = pre_capture.clone();
        let mut changed_at: Option<Instant> = None;

        loop {
            if start.elapsed() >= timeout {
                debug!("delta extraction timed out");
                return (false, latest);
            }
            tokio::time::sleep(self.config.poll_interval).await;

            let capture = match self.pane.capture().await {
                Ok(content) => content,
                Err(_) => continue,
            };
            latest = capture.clone();
            let current_hash = hash_content(&capture);

            if current_hash != last_hash {
                content_changed = true;
                last_hash = current_hash;
                stability = 0;
                changed_at = Some(Instant::now());
                continue;
            }

            if !content_changed {
                continue;
            }
            if changed_at.map(|at| at.elapsed() < self.config.min_wait).unwrap_or(true) {
                continue;
            }

            let lines: Vec<&str> = capture.lines().collect();
            let tail_start = lines.len().saturating_sub(5);
            match last_nonblank(&lines[tail_start..]) {
                Some(line) if self.config.prompt_markers.iter().any(|m| line.trim() == m) => stability += 1,
                Some(_) => stability = 0,
                None => {}
            }

            if stability >= self.config.stable_polls {
                let pre_lines: Vec<&str> = pre_capture.lines().collect();
                let response = extract_response(&lines, &pre_lines, text, &self.config.prompt_markers);
                return (true, filter_response_lines(response, &self.config.prompt_markers));
            }
        }
    }
}

fn hash_content(content: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.finalize().into()
}

fn last_nonblank<'a>(lines: &[&'a str]) -> Option<&'a str> {
    lines.iter().rev().find(|l| !l.trim().is_empty()).copied()
}

/// Find the last line that both contains the submitted command text and
/// starts with a prompt marker; everything after it is the response.
/// Falls back to the set of lines present now but absent from the
/// pre-command snapshot.
fn extract_response<'a>(lines: &[&'a str], pre_lines: &[&'a str], command: &str, markers: &[String]) -> Vec<&'a str> {
    let echo_index = lines.iter().enumerate().rev().find(|(_, line)| {
        line.contains(command) && markers.iter().any(|m| line.trim_start().starts_with(m.as_str()))
    });

    match echo_index {
        Some((idx, _)) => lines[idx + 1..].to_vec(),
        None => {
            let pre_set: HashSet<&str> = pre_lines.iter().copied().collect();
            lines.iter().copied().filter(|line| !pre_set.contains(line)).collect()
        }
    }
}

fn is_box_drawing_noise(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    let box_count = trimmed.chars().filter(|c| BOX_DRAWING_CHARS.contains(*c)).count();
    box_count > 3 && (box_count as f64) > (trimmed.chars().count() as f64) / 2.0
}

fn filter_response_lines(lines: Vec<&str>, markers: &[String]) -> String {
    lines
        .into_iter()
        .filter(|line| {
            let trimmed = line.trim();
            if markers.iter().any(|m| trimmed == m) {
                return false;
            }
            !is_box_drawing_noise(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn extract_response_uses_echoed_command_line() {
        let lines = vec!["❯ hello", "hi there", "how can I help?", "❯"];
        let pre = vec!["❯"];
        let response = extract_response(&lines, &pre, "hello", &["❯".to_owned()]);
        assert_eq!(response, vec!["hi there", "how can I help?", "❯"]);
    }

    #[test]
    fn extract_response_falls_back_to_set_difference_without_echo() {
        let lines = vec!["old line", "new line one", "new line two"];
        let pre = vec!["old line"];
        let response = extract_response(&lines, &pre, "hello", &["❯".to_owned()]);
        assert_eq!(response, vec!["new line one", "new line two"]);
    }

    #[test]
    fn filter_response_lines_drops_bare_prompt_and_box_drawing() {
        let lines = vec!["real content", "❯", "───────────────"];
        let filtered = filter_response_lines(lines, &["❯".to_owned()]);
        assert_eq!(filtered, "real content");
    }

    #[test]
    fn filter_response_lines_keeps_short_runs_of_box_chars() {
        let lines = vec!["a─b"];
        let filtered = filter_response_lines(lines, &["❯".to_owned()]);
        assert_eq!(filtered, "a─b");
    }

    struct FakePane {
        captures: StdMutex<Vec<String>>,
        index: AtomicUsize,
    }

    #[async_trait]
    impl TmuxPane for FakePane {
        async fn capture(&self) -> Result<String, BridgeError> {
            let captures = self.captures.lock().expect("lock");
            let i = self.index.fetch_add(1, Ordering::SeqCst).min(captures.len() - 1);
            Ok(captures[i].clone())
        }
        async fn send_text(&self, _text: &str) -> Result<(), BridgeError> {
            Ok(())
        }
        async fn send_interrupt(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        async fn session_exists(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn send_command_and_wait_extracts_response_once_prompt_restabilizes() {
        let captures = vec![
            "❯".to_owned(),
            "❯ hi\nworking...".to_owned(),
            "❯ hi\nhello back\n❯".to_owned(),
            "❯ hi\nhello back\n❯".to_owned(),
            "❯ hi\nhello back\n❯".to_owned(),
        ];
        let pane = FakePane { captures: StdMutex::new(captures), index: AtomicUsize::new(0) };
        let config = DeltaConfig {
            poll_interval: Duration::from_millis(5),
            min_wait: Duration::from_millis(10),
            stable_polls: 2,
            prompt_markers: vec!["❯".into()],
        };
        let adapter = TerminalAdapter::new(pane, config);
        let (success, text) = adapter.send_command_and_wait("hi", Duration::from_secs(2)).await;
        assert!(success);
        assert_eq!(text, "hello back\n❯");
    }
}
