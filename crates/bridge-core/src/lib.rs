// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared domain types and primitives used by both the bridge server and
//! the in-container agent supervisor.

pub mod error;
pub mod model;
pub mod pipe;

pub use error::BridgeError;
pub use model::{
    CommunicationMode, ConversationTurn, HealthRecord, Instance, InstanceKind, InstanceStatus,
    SessionState, SessionStatus, TurnStatus,
};
pub use pipe::NamedPipeChannel;

/// Current time as seconds since the Unix epoch, as an `f64` — matches the
/// original implementation's use of `time.time()` for all timestamp fields.
pub fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
