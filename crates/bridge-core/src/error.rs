// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error kinds shared across the bridge, the container agent, and the adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum BridgeError {
    #[error("validation failed")]
    Validation,
    #[error("not found")]
    NotFound,
    #[error("transport error")]
    Transport,
    #[error("timed out")]
    Timeout,
    #[error("unauthorized")]
    Unauthorized,
    #[error("rate limited")]
    RateLimited,
    #[error("conflict")]
    Conflict,
    #[error("internal error")]
    Internal,
}

impl BridgeError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Transport => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::NotFound => "NOT_FOUND",
            Self::Transport => "TRANSPORT",
            Self::Timeout => "TIMEOUT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Conflict => "CONFLICT",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>, reference: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into(), reference: reference.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
        reference: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let body = ErrorResponse { error: self.to_error_body(message, reference) };
        (self.http_status(), Json(body))
    }
}

/// Top-level error response envelope returned to HTTP clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with a machine-readable code, a user-safe message, and an
/// opaque reference id correlating with the structured server-side log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub reference: String,
}

/// Generate a short opaque reference id for an error response, logged
/// alongside the full cause so operators can correlate a user-facing
/// message with the detailed server log line.
pub fn error_reference() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_owned()
}
