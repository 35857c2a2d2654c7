// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health monitoring and crash recovery for registered instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cc_bridge_core::{now_secs, BridgeError, HealthRecord};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::session::SessionTracker;

/// Liveness probes the health monitor needs from whatever owns the
/// instance registry. Kept as a trait (rather than a direct dependency
/// on the registry type) so the monitor can be unit-tested against a
/// fake without spinning up Docker or tmux.
#[async_trait]
pub trait InstanceChecker: Send + Sync {
    async fn instance_names(&self) -> Vec<String>;
    async fn container_running(&self, instance_name: &str) -> bool;
    async fn pipes_exist(&self, instance_name: &str) -> bool;
    async fn agent_running(&self, instance_name: &str) -> bool;
    /// Attempt to bring the instance back: recreate missing pipes,
    /// restart the container agent process, or similar.
    async fn recover(&self, instance_name: &str) -> Result<(), BridgeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub recovery_delay: Duration,
    pub max_consecutive_failures: u32,
}

/// Periodically probes every instance, aggregates a `HealthRecord`, and
/// triggers recovery once an instance has failed enough consecutive
/// checks. Recovery attempts are cooldown-gated at `2 * recovery_delay`
/// so a repeatedly-crashing instance isn't hammered with restarts.
pub struct HealthMonitor<C: InstanceChecker> {
    config: HealthMonitorConfig,
    checker: Arc<C>,
    sessions: Arc<SessionTracker>,
    records: Mutex<HashMap<String, HealthRecord>>,
}

impl<C: InstanceChecker> HealthMonitor<C> {
    pub fn new(config: HealthMonitorConfig, checker: Arc<C>, sessions: Arc<SessionTracker>) -> Arc<Self> {
        Arc::new(Self { config, checker, sessions, records: Mutex::new(HashMap::new()) })
    }

    pub async fn status_of(&self, instance_name: &str) -> Option<HealthRecord> {
        self.records.lock().await.get(instance_name).cloned()
    }

    pub async fn all_statuses(&self) -> HashMap<String, HealthRecord> {
        self.records.lock().await.clone()
    }

    pub async fn check_all(&self) {
        for instance_name in self.checker.instance_names().await {
            self.check_instance(&instance_name).await;
        }
    }

    async fn check_instance(&self, instance_name: &str) {
        let now = now_secs();
        let container_running = self.checker.container_running(instance_name).await;
        let pipes_exist = self.checker.pipes_exist(instance_name).await;
        let agent_running = if container_running && pipes_exist {
            self.checker.agent_running(instance_name).await
        } else {
            false
        };
        let session_healthy = self
            .sessions
            .get_session(instance_name)
            .await
            .map(|s| !matches!(s.status, cc_bridge_core::SessionStatus::Error))
            .unwrap_or(true);

        // Matches the original aggregate: a running container with its
        // pipes in place counts as healthy, independent of whether the
        // agent process or session tracker happen to be mid-recovery.
        let healthy = container_running && pipes_exist;

        let mut records = self.records.lock().await;
        let record = records
            .entry(instance_name.to_owned())
            .or_insert_with(|| HealthRecord::new(instance_name.to_owned(), now));

        record.last_check = now;
        record.container_running = container_running;
        record.pipes_exist = pipes_exist;
        record.agent_running = agent_running;
        record.session_healthy = session_healthy;
        record.healthy = healthy;

        if healthy {
            if record.consecutive_failures > 0 {
                info!(instance = instance_name, "instance recovered, resetting failure streak");
            }
            record.consecutive_failures = 0;
            record.error_message = None;
            return;
        }

        record.consecutive_failures += 1;
        record.error_message = Some(format!(
            "container_running={container_running} pipes_exist={pipes_exist}"
        ));
        warn!(
            instance = instance_name,
            consecutive_failures = record.consecutive_failures,
            "instance health check failed"
        );

        if record.consecutive_failures < self.config.max_consecutive_failures {
            return;
        }

        let cooldown = self.config.recovery_delay.as_secs_f64() * 2.0;
        if let Some(last) = record.last_recovery_attempt {
            if now - last < cooldown {
                return;
            }
        }
        record.last_recovery_attempt = Some(now);
        drop(records);

        self.trigger_recovery(instance_name).await;
    }

    async fn trigger_recovery(&self, instance_name: &str) {
        info!(instance = instance_name, "triggering recovery");
        match self.checker.recover(instance_name).await {
            Ok(()) => {
                info!(instance = instance_name, "recovery succeeded");
                self.recover_session_state(instance_name).await;
                if let Some(record) = self.records.lock().await.get_mut(instance_name) {
                    record.consecutive_failures = 0;
                }
            }
            Err(err) => {
                error!(instance = instance_name, error = %err, "recovery failed");
            }
        }
    }

    /// Force-complete an orphaned active turn so a crashed instance
    /// doesn't leave a request hanging forever once the instance is
    /// back up.
    async fn recover_session_state(&self, instance_name: &str) {
        let Some(session) = self.sessions.get_session(instance_name).await else { return };
        let Some(active_id) = session.active_turn_id else { return };
        self.sessions
            .complete_request(instance_name, &active_id, String::new(), Some("Instance recovered from crash".to_owned()))
            .await;
    }
}

/// Spawn the background health-check loop.
pub fn spawn_monitor<C: InstanceChecker + 'static>(monitor: Arc<HealthMonitor<C>>, shutdown: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(monitor.config.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => monitor.check_all().await,
            }
        }
    });
}
