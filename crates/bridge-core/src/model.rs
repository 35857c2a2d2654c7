// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain types shared between the bridge and the container agent.

use serde::{Deserialize, Serialize};

/// Communication mode used to talk to a container instance's agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationMode {
    Fifo,
    Exec,
}

/// Lifecycle status common to both instance variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Created,
    Running,
    Stopped,
    Crashed,
}

/// Variant-specific fields. An instance is either a tmux session on the
/// host or a container running the agent supervisor — never both, and the
/// type system enforces that rather than a runtime flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "instance_type", rename_all = "snake_case")]
pub enum InstanceKind {
    Tmux {
        tmux_session: String,
        pid: Option<i32>,
        cwd: Option<String>,
    },
    Docker {
        container_id: String,
        container_name: String,
        image_name: String,
        docker_network: Option<String>,
        communication_mode: CommunicationMode,
    },
}

/// A registered Claude Code instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    #[serde(flatten)]
    pub kind: InstanceKind,
    pub status: InstanceStatus,
    pub created_at: String,
    pub last_activity_at: Option<String>,
}

/// Validate an instance name: non-empty, ASCII alphanumeric plus `-`/`_`,
/// bounded to 64 characters. Mirrors the constraint the original CLI
/// enforces before it will create an instance record.
pub fn validate_instance_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("instance name must not be empty".to_owned());
    }
    if name.len() > 64 {
        return Err("instance name must be 64 characters or fewer".to_owned());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err("instance name must be alphanumeric, '-', or '_'".to_owned());
    }
    Ok(())
}

/// Status of a single conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

/// A single request/response exchange with an instance. Immutable once
/// `status` reaches `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub request_id: String,
    pub request: String,
    pub timestamp: f64,
    pub response_start: Option<f64>,
    pub response_end: Option<f64>,
    pub response: Option<String>,
    pub status: TurnStatus,
    pub error: Option<String>,
}

impl ConversationTurn {
    pub fn new(request_id: String, request: String, timestamp: f64) -> Self {
        Self {
            request_id,
            request,
            timestamp,
            response_start: None,
            response_end: None,
            response: None,
            status: TurnStatus::Active,
            error: None,
        }
    }

    /// Turn duration in seconds, preferring response_start if recorded.
    pub fn duration(&self) -> Option<f64> {
        match (self.response_end, self.response_start) {
            (Some(end), Some(start)) => Some(end - start),
            (Some(end), None) => Some(end - self.timestamp),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, TurnStatus::Completed | TurnStatus::Failed)
    }
}

/// Overall status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Active,
    Idle,
    Inactive,
    Error,
}

/// Per-instance conversation state, owned exclusively by the session tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub instance_name: String,
    pub created_at: f64,
    pub last_activity_at: f64,
    pub status: SessionStatus,
    pub turns: Vec<ConversationTurn>,
    pub active_turn_id: Option<String>,
    pub total_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub idle_timeout_secs: f64,
    pub request_timeout_secs: f64,
    pub max_history: usize,
}

impl SessionState {
    pub fn new(instance_name: String, now: f64, idle_timeout_secs: f64, request_timeout_secs: f64, max_history: usize) -> Self {
        Self {
            instance_name,
            created_at: now,
            last_activity_at: now,
            status: SessionStatus::Active,
            turns: Vec::new(),
            active_turn_id: None,
            total_requests: 0,
            completed_requests: 0,
            failed_requests: 0,
            idle_timeout_secs,
            request_timeout_secs,
            max_history,
        }
    }

    pub fn idle_time(&self, now: f64) -> f64 {
        now - self.last_activity_at
    }

    pub fn is_idle(&self, now: f64) -> bool {
        self.idle_time(now) > self.idle_timeout_secs
    }

    /// `(completed - failed) / total`, 1.0 when no requests have been made.
    /// `completed_requests` is bumped on every terminal outcome including
    /// failures, so this is not simply a success count over total.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        (self.completed_requests.saturating_sub(self.failed_requests)) as f64 / self.total_requests as f64
    }

    /// Append a turn, evicting the oldest if history now exceeds the cap.
    /// The active turn is never the evicted one since it was just appended.
    pub fn add_turn(&mut self, turn: ConversationTurn) {
        self.active_turn_id = Some(turn.request_id.clone());
        self.turns.push(turn);
        if self.turns.len() > self.max_history {
            self.turns.remove(0);
        }
        self.total_requests += 1;
    }

    pub fn find_turn_mut(&mut self, request_id: &str) -> Option<&mut ConversationTurn> {
        self.turns.iter_mut().find(|t| t.request_id == request_id)
    }

    pub fn complete_turn(&mut self, request_id: &str, response: String, error: Option<String>, now: f64) {
        let was_active = self.active_turn_id.as_deref() == Some(request_id);
        if let Some(turn) = self.find_turn_mut(request_id) {
            if turn.is_complete() {
                return;
            }
            turn.response = Some(response);
            turn.response_end = Some(now);
            turn.status = if error.is_some() { TurnStatus::Failed } else { TurnStatus::Completed };
            turn.error = error;
        } else {
            return;
        }
        self.completed_requests += 1;
        if self.turns.iter().find(|t| t.request_id == request_id).is_some_and(|t| t.error.is_some()) {
            self.failed_requests += 1;
        }
        if was_active {
            self.active_turn_id = None;
        }
        self.last_activity_at = now;
    }

    pub fn recent_history(&self, limit: usize) -> Vec<&ConversationTurn> {
        if limit == 0 || limit >= self.turns.len() {
            self.turns.iter().collect()
        } else {
            self.turns[self.turns.len() - limit..].iter().collect()
        }
    }
}

/// Per-instance health snapshot tracked by the health monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub instance_name: String,
    pub last_check: f64,
    pub container_running: bool,
    pub pipes_exist: bool,
    pub agent_running: bool,
    pub session_healthy: bool,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub error_message: Option<String>,
    pub last_recovery_attempt: Option<f64>,
}

impl HealthRecord {
    pub fn new(instance_name: String, now: f64) -> Self {
        Self {
            instance_name,
            last_check: now,
            container_running: false,
            pipes_exist: false,
            agent_running: false,
            session_healthy: false,
            healthy: false,
            consecutive_failures: 0,
            error_message: None,
            last_recovery_attempt: None,
        }
    }
}
