// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash recovery, exercised against the real `AppState`/`HealthMonitor`
//! pairing (not a fake checker) so the pipe recreation and orphaned-turn
//! completion are both genuinely driven end to end.

use std::time::Duration;

use cc_bridge::config::BridgeConfig;
use cc_bridge::health::{HealthMonitor, HealthMonitorConfig};
use cc_bridge::state::AppState;
use cc_bridge_core::NamedPipeChannel;
use cc_bridge_specs::fifo_instance;

fn config(pipe_dir: std::path::PathBuf, instance_store: std::path::PathBuf) -> BridgeConfig {
    BridgeConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        telegram_bot_token: "test-token".to_owned(),
        telegram_api_base: "http://127.0.0.1:1".to_owned(),
        telegram_chat_id: 1001,
        pipe_dir,
        instance_store,
        max_request_size: 10_000,
        max_message_length: 4_000,
        rate_limit_requests: 10,
        rate_limit_window_secs: 60,
        dedup_capacity: 100,
        dedup_ttl_secs: 600,
        shutdown_timeout_secs: 5,
        response_timeout_secs: 5,
        idle_timeout_secs: 300,
        request_timeout_secs: 120,
        max_history: 10,
        session_monitor_secs: 30,
        max_inactive_secs: 3_600,
        health_check_secs: 30,
        recovery_delay_secs: 0,
        max_consecutive_failures: 3,
        delta_poll_ms: 1_000,
        delta_min_wait_ms: 2_000,
        delta_stable_polls: 3,
        prompt_markers: "❯,>,»".to_owned(),
        preferred_variant: "container".to_owned(),
    }
}

#[tokio::test]
async fn health_monitor_recreates_pipes_and_completes_the_orphaned_turn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipe_dir = dir.path().join("pipes");
    let instance_store = dir.path().join("instances.json");

    let config = config(pipe_dir.clone(), instance_store.clone());
    cc_bridge::registry::InstanceRegistry::load(instance_store.clone())
        .await
        .expect("load registry")
        .create(fifo_instance("demo"))
        .await
        .expect("register instance");

    let state = AppState::new(config).await.expect("app state");

    // Bring the instance up so its pipes exist, then start a request to
    // leave an active turn in place — this is what a crash mid-response
    // would leave behind.
    let instance = state.registry.get("demo").await.expect("instance present");
    let adapter = state.adapter_for(&instance).await.expect("adapter");
    assert!(adapter.start().await);
    let (_request_id, _session) = state.sessions.start_request("demo", "ping").await;

    let channel = NamedPipeChannel::new("demo".to_owned(), pipe_dir.clone());
    assert!(channel.pipes_exist());
    channel.close();
    // Simulate the container crashing: its pipes disappear from disk.
    let _ = tokio::fs::remove_file(pipe_dir.join("demo.in.fifo")).await;
    let _ = tokio::fs::remove_file(pipe_dir.join("demo.out.fifo")).await;
    assert!(!channel.pipes_exist());

    let monitor = HealthMonitor::new(
        HealthMonitorConfig {
            check_interval: Duration::from_secs(30),
            recovery_delay: Duration::from_millis(0),
            max_consecutive_failures: 1,
        },
        state.clone(),
        state.sessions.clone(),
    );
    monitor.check_all().await;

    assert!(channel.pipes_exist(), "recovery should have recreated the fifo pair");

    let session = state.sessions.get_session("demo").await.expect("session present");
    assert!(session.active_turn_id.is_none(), "the orphaned turn should have been force-completed");
    let last_turn = session.recent_history(1).into_iter().next().expect("a turn was recorded");
    assert_eq!(last_turn.error.as_deref(), Some("Instance recovered from crash"));

    let status = monitor.status_of("demo").await.expect("recorded health status");
    assert_eq!(status.consecutive_failures, 0);
}

#[tokio::test]
async fn a_second_crash_right_after_recovery_is_gated_by_the_cooldown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipe_dir = dir.path().join("pipes");
    let instance_store = dir.path().join("instances.json");

    let config = config(pipe_dir.clone(), instance_store.clone());
    cc_bridge::registry::InstanceRegistry::load(instance_store.clone())
        .await
        .expect("load registry")
        .create(fifo_instance("demo"))
        .await
        .expect("register instance");

    let state = AppState::new(config).await.expect("app state");
    let instance = state.registry.get("demo").await.expect("instance present");
    let adapter = state.adapter_for(&instance).await.expect("adapter");
    assert!(adapter.start().await);

    let channel = NamedPipeChannel::new("demo".to_owned(), pipe_dir.clone());
    let monitor = HealthMonitor::new(
        HealthMonitorConfig {
            check_interval: Duration::from_secs(30),
            recovery_delay: Duration::from_secs(60),
            max_consecutive_failures: 1,
        },
        state.clone(),
        state.sessions.clone(),
    );

    let _ = tokio::fs::remove_file(pipe_dir.join("demo.in.fifo")).await;
    let _ = tokio::fs::remove_file(pipe_dir.join("demo.out.fifo")).await;
    monitor.check_all().await;
    assert!(channel.pipes_exist(), "first crash should have been recovered");

    let _ = tokio::fs::remove_file(pipe_dir.join("demo.in.fifo")).await;
    let _ = tokio::fs::remove_file(pipe_dir.join("demo.out.fifo")).await;
    monitor.check_all().await;
    assert!(!channel.pipes_exist(), "a second crash within the cooldown should not trigger another recovery");
}
