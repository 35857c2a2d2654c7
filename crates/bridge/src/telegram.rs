// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin async HTTP wrapper over the Telegram Bot API.

use std::time::Duration;

use cc_bridge_core::BridgeError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single shared client with connection reuse and request timeouts —
/// every call is cancel-safe, no partial side effects beyond what one
/// HTTP request already risks.
pub struct TelegramClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub text: Option<String>,
    pub from: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub data: Option<String>,
    pub from: User,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookInfo {
    pub url: String,
    #[serde(default)]
    pub pending_update_count: u64,
}

impl TelegramClient {
    pub fn new(api_base: &str, bot_token: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { base_url: format!("{}/bot{bot_token}", api_base.trim_end_matches('/')), client }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, body: impl Serialize) -> Result<T, BridgeError> {
        let resp = self.client.post(self.url(method)).json(&body).send().await.map_err(|err| {
            warn!(method, error = %err, "telegram request failed");
            BridgeError::Transport
        })?;
        let parsed: ApiResponse<T> = resp.json().await.map_err(|err| {
            warn!(method, error = %err, "telegram response decode failed");
            BridgeError::Transport
        })?;
        if !parsed.ok {
            warn!(method, description = parsed.description.as_deref().unwrap_or(""), "telegram reported an error");
            return Err(BridgeError::Transport);
        }
        parsed.result.ok_or(BridgeError::Transport)
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, BridgeError> {
        self.call(
            "sendMessage",
            SendMessageRequest { chat_id, text, parse_mode: "HTML", disable_web_page_preview: true },
        )
        .await
    }

    pub async fn set_webhook(&self, url: &str, max_connections: u32) -> Result<bool, BridgeError> {
        self.call("setWebhook", serde_json::json!({ "url": url, "max_connections": max_connections })).await
    }

    pub async fn delete_webhook(&self) -> Result<bool, BridgeError> {
        self.call("deleteWebhook", serde_json::json!({})).await
    }

    pub async fn get_webhook_info(&self) -> Result<WebhookInfo, BridgeError> {
        self.call("getWebhookInfo", serde_json::json!({})).await
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str, text: Option<&str>) -> Result<bool, BridgeError> {
        let mut body = serde_json::json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = serde_json::Value::String(text.to_owned());
        }
        self.call("answerCallbackQuery", body).await
    }

    /// Long-poll for updates. Used only by the out-of-scope chat-id
    /// auto-detection flow; the webhook path never calls this.
    pub async fn get_updates(&self, offset: i64, limit: u32, timeout_secs: u64) -> Result<Vec<Update>, BridgeError> {
        self.call(
            "getUpdates",
            serde_json::json!({ "offset": offset, "limit": limit, "timeout": timeout_secs }),
        )
        .await
    }
}
