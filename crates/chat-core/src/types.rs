use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::ChatError, state_machine::View};

/// Message type produced for user-authored chat text.
pub const CHAT_MESSAGE_TYPE: &str = "chat";

/// Chat message in the wire shape shared with the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Backend-assigned ID; empty when none was assigned.
    #[serde(default)]
    pub id: String,
    /// Message discriminator (`"chat"` for user messages).
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender username.
    pub user: String,
    /// Text body.
    #[serde(rename = "message", alias = "content")]
    pub content: String,
    /// Client send time for outgoing messages, server time for history.
    pub timestamp: DateTime<Utc>,
    /// Room the message belongs to.
    pub room_id: String,
}

impl Message {
    /// Build an outgoing chat message with no backend ID yet.
    pub fn chat(
        user: impl Into<String>,
        room_id: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            kind: CHAT_MESSAGE_TYPE.to_owned(),
            user: user.into(),
            content: content.into(),
            timestamp,
            room_id: room_id.into(),
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}

/// Already-decoded user intents accepted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Replace the input buffer with new text.
    Input(String),
    /// Submit the input buffer (or the cursor selection in the room list).
    Submit,
    /// Go back one view.
    Cancel,
    /// Move the room cursor up.
    NavigateUp,
    /// Move the room cursor down.
    NavigateDown,
    /// Switch from the room list to the join-room form.
    EnterJoinFlow,
    /// Ask the backend for a new room.
    CreateRoom,
}

/// Lifecycle notifications published by stream supervisors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// First handshake for a room succeeded.
    Connected { room_id: String, generation: u64 },
    /// An inbound message was appended to History.
    MessageDelivered { room_id: String },
    /// The room's stream failed while reading; reconnection starts.
    Disconnected { room_id: String, error: ChatError },
    /// One reconnection attempt failed; another is scheduled.
    ReconnectFailed {
        room_id: String,
        attempt: u32,
        error: ChatError,
    },
    /// A replacement handle is installed and listening.
    Reconnected { room_id: String, generation: u64 },
}

impl StreamEvent {
    pub fn room_id(&self) -> &str {
        match self {
            Self::Connected { room_id, .. }
            | Self::MessageDelivered { room_id }
            | Self::Disconnected { room_id, .. }
            | Self::ReconnectFailed { room_id, .. }
            | Self::Reconnected { room_id, .. } => room_id,
        }
    }
}

/// Read-only view of engine state for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub view: View,
    pub cursor: usize,
    pub username: Option<String>,
    pub joined_rooms: Vec<String>,
    /// History of the room shown in `Chat`; empty elsewhere.
    pub messages: Vec<Message>,
    pub input: String,
    pub error_text: Option<String>,
    pub status_text: Option<String>,
}
