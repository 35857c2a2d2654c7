// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The webhook dispatcher: parse, authorize, select, dispatch, format,
//! send — the eleven-step pipeline described in the component design.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cc_bridge_core::{error_reference, now_secs, BridgeError, Instance, InstanceKind, InstanceStatus};
use serde_json::json;
use tracing::{info, warn};

use crate::adapter::{select_instance, SelectionCandidate, VariantPreference};
use crate::state::{AppState, ConcreteAdapter};
use crate::telegram::Update;

const COMMANDS: &[&str] = &["/start", "/status", "/help", "/clear", "/stop", "/resume"];

pub async fn handle_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    if body.len() > state.config.max_request_size {
        return (StatusCode::PAYLOAD_TOO_LARGE, "request too large").into_response();
    }
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty body").into_response();
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            warn!(error = %err, "malformed webhook payload");
            return (StatusCode::BAD_REQUEST, "malformed json").into_response();
        }
    };

    state.shutdown.increment();
    let response = process_update(&state, update).await;
    state.shutdown.decrement();
    response
}

async fn process_update(state: &Arc<AppState>, update: Update) -> Response {
    if state.dedup.is_processed(update.update_id).await {
        return (StatusCode::OK, "ignored: duplicate").into_response();
    }

    let Some(message) = update.message else {
        return (StatusCode::OK, "ignored").into_response();
    };
    let Some(text) = message.text else {
        return (StatusCode::OK, "ignored").into_response();
    };
    let Some(sender) = message.from else {
        return (StatusCode::OK, "ignored").into_response();
    };

    if !state.rate_limiter.is_allowed(sender.id).await {
        let retry_after = state.rate_limiter.retry_after(sender.id).await;
        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "retry_after": retry_after }))).into_response();
    }

    if text.chars().count() > state.config.max_message_length {
        return (StatusCode::BAD_REQUEST, "message too long").into_response();
    }

    // Never reveal that the bot exists or responds to anyone else.
    if sender.id != state.config.telegram_chat_id {
        return (StatusCode::OK, "ignored").into_response();
    }

    if text.starts_with('/') {
        return dispatch_command(state, &text).await;
    }

    dispatch_to_instance(state, &text).await
}

async fn dispatch_command(state: &Arc<AppState>, text: &str) -> Response {
    let command = text.split_whitespace().next().unwrap_or(text);
    if !COMMANDS.contains(&command) {
        return reply(state, "Unknown command.").await;
    }

    match command {
        "/start" => reply(state, "cc-bridge is online.").await,
        "/help" => reply(state, "Commands: /start /status /help /clear /stop /resume").await,
        "/status" => {
            let statuses = state.sessions.get_all_statuses().await;
            if statuses.is_empty() {
                return reply(state, "No active sessions.").await;
            }
            let body = statuses
                .iter()
                .map(|(name, s)| format!("{name}: {:?}, {} turns, success_rate={:.2}", s.status, s.turns.len(), s.success_rate()))
                .collect::<Vec<_>>()
                .join("\n");
            reply(state, &body).await
        }
        "/clear" => dispatch_instance_command(state, |adapter| async move { adapter.clear_conversation().await }).await,
        "/stop" => dispatch_instance_command(state, |adapter| async move { adapter.interrupt().await }).await,
        "/resume" => dispatch_instance_command(state, |adapter| async move { adapter.start().await }).await,
        _ => reply(state, "Unknown command.").await,
    }
}

/// Select the target instance, prepare its adapter, and run `action`
/// against it, replying with a generic outcome message either way.
async fn dispatch_instance_command<F, Fut>(state: &Arc<AppState>, action: F) -> Response
where
    F: FnOnce(Arc<ConcreteAdapter>) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let Some(instance) = select_target_instance(state).await else {
        return reply(state, "No instance available.").await;
    };
    let adapter = match state.adapter_for(&instance).await {
        Ok(adapter) => adapter,
        Err(err) => {
            warn!(instance = %instance.name, error = %err, "failed to prepare adapter for command");
            return reply(state, "Failed to reach the instance.").await;
        }
    };
    let ok = action(adapter).await;
    reply(state, if ok { "Done." } else { "That didn't work." }).await
}

async fn dispatch_to_instance(state: &Arc<AppState>, text: &str) -> Response {
    let Some(instance) = select_target_instance(state).await else {
        return send_generic_error(state, BridgeError::NotFound, "no instance available").await;
    };

    let adapter = match state.adapter_for(&instance).await {
        Ok(adapter) => adapter,
        Err(err) => return send_generic_error_with_cause(state, BridgeError::Internal, &err, "preparing instance adapter").await,
    };

    if !adapter.is_running().await && !adapter.start().await {
        return send_generic_error(state, BridgeError::Internal, "instance failed to start").await;
    }
    let _ = state.registry.update_status(&instance.name, InstanceStatus::Running).await;
    let _ = state.registry.touch_activity(&instance.name).await;

    let (success, raw_reply) = adapter.send_command_and_wait(text, state.config.response_timeout()).await;
    if !success {
        return send_generic_error(state, BridgeError::Timeout, &raw_reply).await;
    }

    let cleaned = clean_reply(&raw_reply, state.config.max_message_length);
    match state.telegram.send_message(state.config.telegram_chat_id, &cleaned).await {
        Ok(_) => (StatusCode::OK, "ok").into_response(),
        Err(err) => {
            warn!(error = %err, "failed to deliver reply to telegram");
            (StatusCode::OK, "delivery failed").into_response()
        }
    }
}

async fn select_target_instance(state: &Arc<AppState>) -> Option<Instance> {
    let instances = state.registry.list().await;
    let mut by_name: HashMap<String, Instance> = HashMap::new();
    let mut candidates = Vec::with_capacity(instances.len());

    for instance in instances {
        let status = state.registry.get_status(&instance.name).await.unwrap_or(instance.status);
        let is_terminal = matches!(instance.kind, InstanceKind::Tmux { .. });
        candidates.push(SelectionCandidate {
            name: instance.name.clone(),
            running: status == InstanceStatus::Running,
            is_terminal,
        });
        by_name.insert(instance.name.clone(), instance);
    }

    let preferred = if state.config.preferred_variant == "terminal" {
        VariantPreference::Terminal
    } else {
        VariantPreference::Container
    };

    let selected = select_instance(&candidates, preferred)?;
    by_name.remove(&selected.name)
}

/// Reply with a user-visible but generic error, never leaking internal
/// exception text, correlated with the server log via a short opaque
/// reference id.
async fn send_generic_error(state: &Arc<AppState>, kind: BridgeError, cause: &str) -> Response {
    let reference = error_reference();
    warn!(reference, code = kind.as_str(), cause, "webhook dispatch failed");
    reply(state, &format!("Something went wrong (ref {reference}). Please try again.")).await
}

async fn send_generic_error_with_cause(state: &Arc<AppState>, kind: BridgeError, cause: &dyn std::fmt::Display, context: &str) -> Response {
    send_generic_error(state, kind, &format!("{context}: {cause}")).await
}

async fn reply(state: &Arc<AppState>, text: &str) -> Response {
    match state.telegram.send_message(state.config.telegram_chat_id, text).await {
        Ok(_) => (StatusCode::OK, "ok").into_response(),
        Err(err) => {
            warn!(error = %err, "failed to send reply");
            (StatusCode::OK, "send failed").into_response()
        }
    }
}

/// Strip prompt/UI artifacts, collapse long runs of blank lines,
/// HTML-escape, and truncate to the platform's message limit.
fn clean_reply(text: &str, max_len: usize) -> String {
    let escaped = html_escape(text.trim());
    let collapsed = collapse_blank_runs(&escaped);
    truncate_with_marker(&collapsed, max_len)
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn collapse_blank_runs(text: &str) -> String {
    let mut out = Vec::new();
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                out.push(line);
            }
        } else {
            blank_run = 0;
            out.push(line);
        }
    }
    out.join("\n")
}

fn truncate_with_marker(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_owned();
    }
    const MARKER: &str = "\n(truncated)";
    let budget = max_len.saturating_sub(MARKER.chars().count());
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{MARKER}")
}

pub async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = now_secs() - state.started_at;
    let instances = state.registry.list().await;
    let mut by_status: HashMap<String, u32> = HashMap::new();
    for instance in &instances {
        *by_status.entry(format!("{:?}", instance.status).to_lowercase()).or_default() += 1;
    }
    info!(uptime, "health check");
    Json(json!({
        "status": "ok",
        "uptime_seconds": uptime,
        "instances_by_status": by_status,
        "pending_requests": state.shutdown.pending_requests(),
    }))
}

pub async fn handle_root() -> StatusCode {
    StatusCode::NOT_FOUND
}
