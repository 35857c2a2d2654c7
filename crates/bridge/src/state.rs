// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dependency-injected application state: wires the registry, session
//! tracker, rate limiter/deduplicator, health monitor, and per-instance
//! adapters together. No global singletons — everything is constructed
//! once in `AppState::new` and handed out by reference.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cc_bridge_core::{
    now_secs, BridgeError, CommunicationMode, Instance, InstanceKind, InstanceStatus, NamedPipeChannel,
};
use tokio::sync::Mutex;

use crate::adapter::container::{DaemonContainerAdapter, DockerExecTransport, ExecContainerAdapter};
use crate::adapter::terminal::{DeltaConfig, TerminalAdapter, TmuxCli};
use crate::adapter::InstanceAdapter;
use crate::config::BridgeConfig;
use crate::health::InstanceChecker;
use crate::ratelimit::{Deduplicator, RateLimiter, ShutdownGate};
use crate::registry::InstanceRegistry;
use crate::session::{SessionTracker, SessionTrackerConfig};
use crate::telegram::TelegramClient;

/// The adapter backing actual production instances: a real tmux binary
/// for terminal instances, a real `docker exec` child for legacy-mode
/// container instances.
pub type ConcreteAdapter = InstanceAdapter<TmuxCli, DockerExecTransport>;

pub struct AppState {
    pub config: Arc<BridgeConfig>,
    pub registry: Arc<InstanceRegistry>,
    pub sessions: Arc<SessionTracker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub dedup: Arc<Deduplicator>,
    pub shutdown: Arc<ShutdownGate>,
    pub telegram: Arc<TelegramClient>,
    adapters: Mutex<HashMap<String, Arc<ConcreteAdapter>>>,
    pub started_at: f64,
}

impl AppState {
    pub async fn new(config: BridgeConfig) -> Result<Arc<Self>, BridgeError> {
        let registry = Arc::new(InstanceRegistry::load(config.instance_store.clone()).await?);
        let sessions = SessionTracker::new(SessionTrackerConfig {
            idle_timeout: config.idle_timeout(),
            request_timeout: config.request_timeout(),
            max_history: config.max_history,
        });
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_requests as usize, config.rate_limit_window()));
        let dedup = Arc::new(Deduplicator::new(config.dedup_capacity, config.dedup_ttl()));
        let shutdown = ShutdownGate::new();
        let telegram = Arc::new(TelegramClient::new(&config.telegram_api_base, &config.telegram_bot_token));

        Ok(Arc::new(Self {
            config: Arc::new(config),
            registry,
            sessions,
            rate_limiter,
            dedup,
            shutdown,
            telegram,
            adapters: Mutex::new(HashMap::new()),
            started_at: now_secs(),
        }))
    }

    /// Get or lazily build the adapter for a registered instance.
    pub async fn adapter_for(&self, instance: &Instance) -> Result<Arc<ConcreteAdapter>, BridgeError> {
        let mut adapters = self.adapters.lock().await;
        if let Some(existing) = adapters.get(&instance.name) {
            return Ok(existing.clone());
        }
        let built = self.build_adapter(instance).await?;
        adapters.insert(instance.name.clone(), built.clone());
        Ok(built)
    }

    pub async fn drop_adapter(&self, instance_name: &str) {
        self.adapters.lock().await.remove(instance_name);
    }

    async fn build_adapter(&self, instance: &Instance) -> Result<Arc<ConcreteAdapter>, BridgeError> {
        match &instance.kind {
            InstanceKind::Tmux { tmux_session, .. } => {
                let pane = TmuxCli::new(tmux_session.clone());
                let delta = DeltaConfig {
                    poll_interval: self.config.delta_poll_interval(),
                    min_wait: self.config.delta_min_wait(),
                    stable_polls: self.config.delta_stable_polls,
                    prompt_markers: self.config.prompt_markers(),
                };
                Ok(Arc::new(InstanceAdapter::Terminal(TerminalAdapter::new(pane, delta))))
            }
            InstanceKind::Docker { communication_mode: CommunicationMode::Fifo, .. } => {
                let channel = NamedPipeChannel::new(instance.name.clone(), self.config.pipe_dir.clone());
                Ok(Arc::new(InstanceAdapter::ContainerDaemon(DaemonContainerAdapter::new(
                    instance.name.clone(),
                    channel,
                    self.sessions.clone(),
                ))))
            }
            InstanceKind::Docker { container_name, communication_mode: CommunicationMode::Exec, .. } => {
                let transport = DockerExecTransport::spawn(container_name, "claude").await?;
                Ok(Arc::new(InstanceAdapter::ContainerExec(ExecContainerAdapter::new(
                    instance.name.clone(),
                    transport,
                    self.sessions.clone(),
                ))))
            }
        }
    }
}

#[async_trait]
impl InstanceChecker for AppState {
    async fn instance_names(&self) -> Vec<String> {
        self.registry
            .list()
            .await
            .into_iter()
            .filter(|i| matches!(i.kind, InstanceKind::Docker { communication_mode: CommunicationMode::Fifo, .. }))
            .map(|i| i.name)
            .collect()
    }

    async fn container_running(&self, instance_name: &str) -> bool {
        matches!(self.registry.get_status(instance_name).await, Some(InstanceStatus::Running))
    }

    async fn pipes_exist(&self, instance_name: &str) -> bool {
        let Some(instance) = self.registry.get(instance_name).await else { return false };
        if !matches!(instance.kind, InstanceKind::Docker { .. }) {
            return false;
        }
        NamedPipeChannel::new(instance_name.to_owned(), self.config.pipe_dir.clone()).pipes_exist()
    }

    async fn agent_running(&self, instance_name: &str) -> bool {
        let Some(instance) = self.registry.get(instance_name).await else { return false };
        let InstanceKind::Docker { container_name, .. } = &instance.kind else { return false };
        tokio::process::Command::new("docker")
            .args(["exec", container_name, "pgrep", "-f", "cc-bridge-agentd"])
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Re-create the FIFO pair if missing and drop any cached adapter so
    /// the next request builds a fresh one against the new pipes.
    async fn recover(&self, instance_name: &str) -> Result<(), BridgeError> {
        let instance = self.registry.get(instance_name).await.ok_or(BridgeError::NotFound)?;
        if !matches!(self.registry.get_status(instance_name).await, Some(InstanceStatus::Running)) {
            return Err(BridgeError::Conflict);
        }
        if let InstanceKind::Docker { communication_mode: CommunicationMode::Fifo, .. } = &instance.kind {
            let channel = NamedPipeChannel::new(instance_name.to_owned(), self.config.pipe_dir.clone());
            if !channel.pipes_exist() {
                channel.create_pipes()?;
                self.drop_adapter(instance_name).await;
            }
        }
        Ok(())
    }
}
