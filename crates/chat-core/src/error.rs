use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for user-facing handling and recovery behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Session creation rejected.
    Auth,
    /// Room creation/join/history rejected by server logic.
    Backend,
    /// Stream handshake failed, or no usable stream exists.
    Connect,
    /// Stream read failure after a successful handshake.
    Read,
    /// Stream write failure after a successful handshake.
    Write,
    /// A backend call did not finish within its deadline.
    Timeout,
    /// Serialization/deserialization failure.
    Serialization,
    /// Invalid input or configuration.
    Config,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload shared by the engine, the stream manager and backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ChatError {
    /// Construct a new error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// No stream entry exists for the room.
    pub fn not_connected(room_id: &str) -> Self {
        Self::new(
            ChatErrorCategory::Connect,
            "not_connected",
            format!("no stream is open for room {room_id}"),
        )
    }

    /// The room's stream is inside its reconnection window.
    pub fn reconnecting(room_id: &str) -> Self {
        Self::new(
            ChatErrorCategory::Connect,
            "reconnecting",
            format!("stream for room {room_id} is reconnecting"),
        )
    }

    /// A bounded backend call ran out of time.
    pub fn timed_out(action: &str, limit: Duration) -> Self {
        Self::new(
            ChatErrorCategory::Timeout,
            "timeout",
            format!("{action} did not complete within {}ms", limit.as_millis()),
        )
    }

    /// Whether this error came from stream I/O rather than a request.
    pub fn is_stream_io(&self) -> bool {
        matches!(
            self.category,
            ChatErrorCategory::Read | ChatErrorCategory::Write
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ChatErrorCategory {
    match status {
        401 | 403 => ChatErrorCategory::Auth,
        408 | 504 => ChatErrorCategory::Timeout,
        400..=599 => ChatErrorCategory::Backend,
        _ => ChatErrorCategory::Internal,
    }
}
