// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end webhook scenarios against a real `cc-bridge` subprocess,
//! a mock Telegram API, and a FIFO container peer played by
//! `cc_bridge_agentd`'s own pipe primitives.

use std::time::Duration;

use cc_bridge_specs::{fifo_instance, respond_once, BridgeBuilder, MockTelegram};

#[tokio::test]
async fn happy_path_round_trips_through_a_container_instance() {
    let telegram = MockTelegram::start().await.expect("mock telegram");
    let bridge = BridgeBuilder::default()
        .spawn(&telegram, &[fifo_instance("demo")])
        .await
        .expect("spawn cc-bridge");

    let pipe_dir = bridge.pipe_dir().to_path_buf();
    let agent = tokio::spawn(async move { respond_once(&pipe_dir, "demo", "pong").await });

    let resp = bridge.send_text(1, 1001, "ping").await.expect("post webhook");
    assert!(resp.status().is_success());

    let command = agent.await.expect("agent task").expect("agent saw a command");
    assert_eq!(command, "ping");

    let texts = telegram.sent_texts().await;
    assert_eq!(texts, vec!["pong".to_owned()]);
}

#[tokio::test]
async fn duplicate_updates_are_processed_exactly_once() {
    let telegram = MockTelegram::start().await.expect("mock telegram");
    let bridge = BridgeBuilder::default()
        .spawn(&telegram, &[fifo_instance("demo")])
        .await
        .expect("spawn cc-bridge");

    let pipe_dir = bridge.pipe_dir().to_path_buf();
    let agent = tokio::spawn(async move { respond_once(&pipe_dir, "demo", "pong").await });

    // Telegram itself redelivers updates on retry; the same update_id
    // arrives three times in a row.
    for _ in 0..3 {
        let resp = bridge.send_text(42, 1001, "ping").await.expect("post webhook");
        assert!(resp.status().is_success());
    }

    agent.await.expect("agent task").expect("agent saw exactly one command");
    assert_eq!(telegram.sent_texts().await.len(), 1);
}

#[tokio::test]
async fn third_request_within_the_window_is_rate_limited() {
    let telegram = MockTelegram::start().await.expect("mock telegram");
    let bridge = BridgeBuilder::default()
        .rate_limit(2, 60)
        .spawn(&telegram, &[fifo_instance("demo")])
        .await
        .expect("spawn cc-bridge");

    let pipe_dir = bridge.pipe_dir().to_path_buf();
    tokio::spawn(async move {
        let _ = respond_once(&pipe_dir, "demo", "one").await;
        let _ = respond_once(&pipe_dir, "demo", "two").await;
    });

    let first = bridge.send_text(1, 1001, "one").await.expect("post webhook");
    assert!(first.status().is_success());
    let second = bridge.send_text(2, 1001, "two").await.expect("post webhook");
    assert!(second.status().is_success());

    let third = bridge.send_text(3, 1001, "three").await.expect("post webhook");
    assert_eq!(third.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = third.json().await.expect("json body");
    assert!(body.get("retry_after").is_some());
}

#[tokio::test]
async fn stop_command_sends_a_raw_interrupt_byte_not_a_newline_framed_line() {
    let telegram = MockTelegram::start().await.expect("mock telegram");
    let bridge = BridgeBuilder::default()
        .spawn(&telegram, &[fifo_instance("demo")])
        .await
        .expect("spawn cc-bridge");

    // Bring the instance up first so its pipes exist.
    let pipe_dir = bridge.pipe_dir().to_path_buf();
    let first_agent = tokio::spawn(async move { respond_once(&pipe_dir, "demo", "hello").await });
    bridge.send_text(1, 1001, "hi").await.expect("post webhook");
    first_agent.await.expect("agent task").expect("agent saw a command");

    let input = bridge.pipe_dir().join("demo.in.fifo");
    let reader = tokio::spawn(async move {
        // A real agent reads the interrupt as a single unterminated
        // byte (0x03), never as a command line.
        let fd = nix::fcntl::open(&input, nix::fcntl::OFlag::O_RDONLY, nix::sys::stat::Mode::empty())?;
        let mut buf = [0u8; 1];
        loop {
            match nix::unistd::read(&fd, &mut buf) {
                Ok(1) => return Ok::<u8, anyhow::Error>(buf[0]),
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => anyhow::bail!("read failed: {e}"),
            }
        }
    });

    let resp = bridge.send_text(2, 1001, "/stop").await.expect("post webhook");
    assert!(resp.status().is_success());

    let byte = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("reader finished")
        .expect("reader task")
        .expect("read succeeded");
    assert_eq!(byte, 0x03);
}

#[tokio::test]
async fn graceful_shutdown_drains_an_in_flight_request_before_exiting() {
    let telegram = MockTelegram::start().await.expect("mock telegram");
    let mut bridge = BridgeBuilder::default()
        .response_timeout_secs(10)
        .shutdown_timeout_secs(3)
        .spawn(&telegram, &[fifo_instance("demo")])
        .await
        .expect("spawn cc-bridge");

    let pipe_dir = bridge.pipe_dir().to_path_buf();
    let agent = tokio::spawn(async move {
        // Delay the reply so the webhook request is still in flight when
        // SIGTERM lands.
        tokio::time::sleep(Duration::from_millis(300)).await;
        respond_once(&pipe_dir, "demo", "finished before shutdown").await
    });

    let pending = tokio::spawn({
        let base = bridge.base_url();
        async move {
            let body = serde_json::json!({
                "update_id": 9,
                "message": { "message_id": 9, "text": "ping", "from": { "id": 1001 } },
            });
            reqwest::Client::new().post(format!("{base}/webhook")).json(&body).send().await
        }
    });

    // Give the request time to register as in-flight before signalling.
    tokio::time::sleep(Duration::from_millis(100)).await;
    bridge.send_sigterm().expect("send sigterm");

    let resp = tokio::time::timeout(Duration::from_secs(5), pending).await.expect("request finished").expect("join").expect("http request");
    assert!(resp.status().is_success());
    agent.await.expect("agent task").expect("agent saw a command");

    let status = bridge.wait_exit(Duration::from_secs(5)).await.expect("process exited");
    assert!(status.success());
    assert_eq!(telegram.sent_texts().await, vec!["finished before shutdown".to_owned()]);
}
