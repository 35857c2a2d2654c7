// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session tracking: per-instance conversation state, request correlation,
//! idle/timeout monitoring and bounded history.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cc_bridge_core::{now_secs, ConversationTurn, SessionState, SessionStatus};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tunable thresholds for a `SessionTracker`, mirrored onto every session
/// it creates.
#[derive(Debug, Clone, Copy)]
pub struct SessionTrackerConfig {
    pub idle_timeout: Duration,
    pub request_timeout: Duration,
    pub max_history: usize,
}

/// Tracks conversation state for every instance that has received at
/// least one request. All mutation goes through a single async mutex —
/// the teacher's session/credential maps in `coopmux`'s `PodRegistry`
/// follow the same single-lock-per-map discipline.
pub struct SessionTracker {
    config: SessionTrackerConfig,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionTracker {
    pub fn new(config: SessionTrackerConfig) -> Arc<Self> {
        Arc::new(Self { config, sessions: Mutex::new(HashMap::new()) })
    }

    fn get_or_create_unlocked<'a>(
        sessions: &'a mut HashMap<String, SessionState>,
        config: SessionTrackerConfig,
        instance_name: &str,
    ) -> &'a mut SessionState {
        sessions.entry(instance_name.to_owned()).or_insert_with(|| {
            info!(instance = instance_name, "created session");
            SessionState::new(
                instance_name.to_owned(),
                now_secs(),
                config.idle_timeout.as_secs_f64(),
                config.request_timeout.as_secs_f64(),
                config.max_history,
            )
        })
    }

    /// Begin a new request: lazily creates the session, appends an active
    /// turn, and returns the fresh request id plus a snapshot of the
    /// session.
    pub async fn start_request(&self, instance_name: &str, request: &str) -> (String, SessionState) {
        let mut sessions = self.sessions.lock().await;

        let request_id = Uuid::new_v4().to_string();
        let turn = ConversationTurn::new(request_id.clone(), request.to_owned(), now_secs());

        let session = Self::get_or_create_unlocked(&mut sessions, self.config, instance_name);
        session.add_turn(turn);
        session.last_activity_at = now_secs();
        session.status = SessionStatus::Active;

        debug!(instance = instance_name, request_id = %request_id, "started request");
        (request_id, session.clone())
    }

    /// Complete a request with a response or an error. A no-op if the
    /// session or turn no longer exists (e.g. already completed).
    pub async fn complete_request(&self, instance_name: &str, request_id: &str, response: String, error: Option<String>) {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(instance_name) else { return };
        let failed = error.is_some();
        session.complete_turn(request_id, response, error, now_secs());
        debug!(instance = instance_name, request_id, failed, "completed request");
    }

    pub async fn get_session(&self, instance_name: &str) -> Option<SessionState> {
        self.sessions.lock().await.get(instance_name).cloned()
    }

    pub async fn get_status(&self, instance_name: &str) -> Option<SessionState> {
        self.get_session(instance_name).await
    }

    pub async fn get_all_statuses(&self) -> HashMap<String, SessionState> {
        self.sessions.lock().await.clone()
    }

    pub async fn get_history(&self, instance_name: &str, limit: usize) -> Vec<ConversationTurn> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(instance_name)
            .map(|s| s.recent_history(limit).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn remove_session(&self, instance_name: &str) {
        if self.sessions.lock().await.remove(instance_name).is_some() {
            info!(instance = instance_name, "removed session");
        }
    }

    /// Drop sessions whose last activity predates `max_inactive`.
    pub async fn cleanup_inactive_sessions(&self, max_inactive: Duration) -> Vec<String> {
        let now = now_secs();
        let mut sessions = self.sessions.lock().await;
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| now - s.last_activity_at > max_inactive.as_secs_f64())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            sessions.remove(name);
            info!(instance = name, "cleaned up inactive session");
        }
        stale
    }

    /// Scan every session for a timed-out active turn or an idle
    /// transition. Runs with the tracker's lock held for the whole sweep,
    /// matching the original implementation; the onus is on the caller's
    /// idle callback to be fast and infallible since it runs under the lock.
    pub async fn check_timeouts<F>(&self, mut on_idle: F)
    where
        F: FnMut(&str, &SessionState),
    {
        let now = now_secs();
        let mut sessions = self.sessions.lock().await;
        for (instance_name, session) in sessions.iter_mut() {
            if let Some(active_id) = session.active_turn_id.clone() {
                if let Some(turn) = session.turns.iter().find(|t| t.request_id == active_id) {
                    let elapsed = now - turn.timestamp;
                    if elapsed > session.request_timeout_secs {
                        warn!(instance = instance_name, request_id = %active_id, elapsed, "request timed out");
                        session.complete_turn(&active_id, String::new(), Some("Request timeout".to_owned()), now);
                    }
                }
            }

            let was_idle = matches!(session.status, SessionStatus::Idle);
            if session.is_idle(now) {
                session.status = SessionStatus::Idle;
            } else if was_idle {
                session.status = SessionStatus::Active;
            }

            if session.is_idle(now) {
                on_idle(instance_name, session);
            }
        }
    }
}

/// Spawn the background monitor loop: sweeps timeouts/idle transitions on
/// `interval`, cancellable via the provided token.
pub fn spawn_monitor(tracker: Arc<SessionTracker>, interval: Duration, shutdown: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tracker.check_timeouts(|name, session| {
                        debug!(instance = name, idle_time = session.idle_time(now_secs()), "session idle");
                    }).await;
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
