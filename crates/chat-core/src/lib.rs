//! Client-side chat engine.
//!
//! The engine turns user intents into backend calls through a small
//! navigation state machine, keeps per-room message history, and holds one
//! supervised stream per joined room that reconnects on read failure.
//! Transports plug in through the [`ChatBackend`] trait.

/// Backend client contract and stream halves.
pub mod backend;
/// Intent/snapshot channel primitives.
pub mod channel;
/// Intent handling and client state.
pub mod engine;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Per-room message history.
pub mod history;
/// Reconnection delay policy.
pub mod retry;
/// Task wrapper that drives an engine from channels.
pub mod runtime;
/// Session and room records.
pub mod session;
/// Navigation views and intent routing.
pub mod state_machine;
/// Per-room stream supervision.
pub mod stream;
/// Wire message, intent and snapshot types.
pub mod types;

#[cfg(test)]
mod test_support;

pub use backend::{ChatBackend, MessageSink, MessageSource, StreamHandle, with_deadline};
pub use channel::{ChannelError, EngineChannels, SnapshotStream};
pub use engine::{ChatEngine, EngineConfig};
pub use error::{ChatError, ChatErrorCategory, classify_http_status};
pub use history::{HistoryStore, MAX_FETCH_LIMIT};
pub use retry::RetryPolicy;
pub use runtime::{RuntimeHandle, spawn_runtime};
pub use session::{RoomRef, Session};
pub use state_machine::{NavigationStateMachine, Transition, View};
pub use stream::{OpenOutcome, StreamManager, StreamSettings};
pub use types::{CHAT_MESSAGE_TYPE, EngineSnapshot, Intent, Message, StreamEvent};
